use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{RevocationError, RevocationKey, RevocationRegistry};

/// Process-local revocation registry.
///
/// Records expire lazily on lookup. Records nobody looks up again are
/// reclaimed by [`InMemoryRevocationRegistry::purge_expired`], which
/// [`InMemoryRevocationRegistry::start_purge_task`] runs on an interval.
#[derive(Debug, Default)]
pub struct InMemoryRevocationRegistry {
    revoked: DashMap<RevocationKey, Instant>,
}

impl InMemoryRevocationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired records and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.revoked.len();
        self.revoked.retain(|_, expires_at| *expires_at > now);
        before - self.revoked.len()
    }

    /// Starts a background task running [`Self::purge_expired`] every `period`.
    ///
    /// The task exits once the registry is dropped.
    pub fn start_purge_task(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let purged = registry.purge_expired();
                if purged > 0 {
                    tracing::debug!(
                        purged,
                        remaining = registry.len(),
                        "Purged expired revocations"
                    );
                }
            }
        })
    }

    /// Number of stored records, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Returns `true` if no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

#[async_trait]
impl RevocationRegistry for InMemoryRevocationRegistry {
    async fn exists(&self, key: &RevocationKey) -> Result<bool, RevocationError> {
        let now = Instant::now();
        let live = match self.revoked.get(key) {
            Some(expires_at) => *expires_at > now,
            None => return Ok(false),
        };
        if !live {
            self.revoked.remove_if(key, |_, expires_at| *expires_at <= now);
        }
        Ok(live)
    }

    async fn record(&self, key: &RevocationKey, ttl: Duration) -> Result<(), RevocationError> {
        let expires_at = Instant::now() + ttl;
        self.revoked
            .entry(key.clone())
            .and_modify(|current| *current = (*current).max(expires_at))
            .or_insert(expires_at);
        Ok(())
    }
}
