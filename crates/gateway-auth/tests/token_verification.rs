//! Verifier behavior against real RS256 tokens.

mod common;

use std::sync::Arc;

use common::{ISSUER, KEY_A, KEY_B, TestProvider, access_claims, hs256_token, raw_token};
use gateway_auth::{AuthError, KeySetCache, TokenType, TokenVerifier};
use serde_json::json;
use time::OffsetDateTime;

fn verifier(provider: Arc<TestProvider>) -> TokenVerifier {
    let config = common::test_config();
    TokenVerifier::new(KeySetCache::new(provider, &config.key_set))
}

#[tokio::test]
async fn test_valid_token_yields_claims() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider.clone());

    let token = KEY_A.sign(&access_claims("user-1"));
    let claims = verifier.verify(&token, ISSUER).await.unwrap();

    assert_eq!(claims.subject, "user-1");
    assert_eq!(claims.issuer, ISSUER);
    assert_eq!(claims.key_id, "A");
    assert_eq!(claims.token_type, TokenType::Access);
    assert_eq!(claims.username.as_deref(), Some("alice"));
    assert!(claims.expires_at > OffsetDateTime::now_utc());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_repeated_verification_is_stable() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider.clone());
    let token = KEY_A.sign(&access_claims("user-1"));

    let first = verifier.verify(&token, ISSUER).await.unwrap();
    for _ in 0..10 {
        assert_eq!(verifier.verify(&token, ISSUER).await.unwrap(), first);
    }
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_hmac_token_signed_with_public_key_is_rejected() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider.clone());

    let forged = hs256_token("A", KEY_A.public_pem.as_bytes(), &access_claims("admin"));
    let err = verifier.verify(&forged, ISSUER).await.unwrap_err();

    assert_eq!(err, AuthError::unsupported_algorithm("HS256"));
    assert_eq!(provider.calls(), 0, "algorithm check runs before key lookup");
}

#[tokio::test]
async fn test_alg_none_is_rejected() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider);

    let token = raw_token(&json!({"alg": "none", "kid": "A"}), &access_claims("admin"));
    assert_eq!(
        verifier.verify(&token, ISSUER).await.unwrap_err(),
        AuthError::unsupported_algorithm("none")
    );

    let token = raw_token(&json!({"kid": "A"}), &access_claims("admin"));
    assert!(matches!(
        verifier.verify(&token, ISSUER).await.unwrap_err(),
        AuthError::UnsupportedAlgorithm { .. }
    ));
}

#[tokio::test]
async fn test_unknown_kid_is_rejected_without_signature_check() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider.clone());

    let token = KEY_B.sign(&access_claims("user-1"));
    assert_eq!(
        verifier.verify(&token, ISSUER).await.unwrap_err(),
        AuthError::unknown_key("B")
    );

    let token = KEY_A.sign_with_kid(None, &access_claims("user-1"));
    assert!(matches!(
        verifier.verify(&token, ISSUER).await.unwrap_err(),
        AuthError::UnknownSigningKey { .. }
    ));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_signature_from_other_key_is_rejected() {
    // kid A is trusted, but the token is signed with key B.
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider);

    let token = KEY_B.sign_with_kid(Some("A"), &access_claims("user-1"));
    assert_eq!(
        verifier.verify(&token, ISSUER).await.unwrap_err(),
        AuthError::SignatureInvalid
    );
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider);

    let token = KEY_A.sign(&access_claims("user-1"));
    let forged_payload = KEY_A.sign(&access_claims("admin"));

    let mut parts: Vec<&str> = token.split('.').collect();
    parts[1] = forged_payload.split('.').nth(1).unwrap();
    let tampered = parts.join(".");

    assert_eq!(
        verifier.verify(&tampered, ISSUER).await.unwrap_err(),
        AuthError::SignatureInvalid
    );
}

#[tokio::test]
async fn test_claim_failures() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider);
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let cases = [
        ("iss", json!({"sub": "u", "iss": "other", "exp": now + 300, "token_type": "access"})),
        ("exp", json!({"sub": "u", "iss": ISSUER, "exp": now - 10, "token_type": "access"})),
        ("exp", json!({"sub": "u", "iss": ISSUER, "token_type": "access"})),
        ("sub", json!({"sub": "", "iss": ISSUER, "exp": now + 300, "token_type": "access"})),
        ("sub", json!({"iss": ISSUER, "exp": now + 300, "token_type": "access"})),
        ("token_type", json!({"sub": "u", "iss": ISSUER, "exp": now + 300, "token_type": "refresh"})),
        ("token_type", json!({"sub": "u", "iss": ISSUER, "exp": now + 300})),
    ];

    for (expected_claim, claims) in cases {
        let token = KEY_A.sign(&claims);
        match verifier.verify(&token, ISSUER).await {
            Err(AuthError::ClaimInvalid { claim, .. }) => {
                assert_eq!(claim, expected_claim, "{claims}");
            }
            other => panic!("expected {expected_claim} failure for {claims}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_malformed_tokens() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    let verifier = verifier(provider.clone());

    for token in ["", "abc", "a.b", "a.b.c.d", "..", "!!!.e30.sig"] {
        let err = verifier.verify(token, ISSUER).await.unwrap_err();
        assert!(
            matches!(err, AuthError::MissingOrMalformedHeader { .. }),
            "{token:?} -> {err:?}"
        );
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_key_set_outage_on_cold_cache() {
    let provider = TestProvider::new(vec![KEY_A.jwk()]);
    provider.set_failing(true);
    let verifier = verifier(provider);

    let token = KEY_A.sign(&access_claims("user-1"));
    let err = verifier.verify(&token, ISSUER).await.unwrap_err();
    assert!(err.is_backend_failure(), "{err:?}");
}
