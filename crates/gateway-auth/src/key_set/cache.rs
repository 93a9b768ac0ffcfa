//! Signing key-set cache.
//!
//! The cache holds at most one [`KeySetSnapshot`] and moves between four
//! states:
//!
//! ```text
//!            refresh ok                       ttl elapsed / invalidate
//! Empty ───────────────► Fresh ◄──────────────────────────┐
//!   ▲                      │                              │
//!   │ refresh failed,      │ ttl elapsed                  │ refresh ok
//!   │ nothing to serve     ▼                              │
//!   └──────────────── Refreshing ───────────────► StaleButUsable
//!                                refresh failed,
//!                                previous snapshot kept
//! ```
//!
//! Only the caller that moves the state into `Refreshing` talks to the
//! provider. Callers arriving while a refresh is in flight either read the
//! previous snapshot or, on a cold cache, wait for the single refresh and
//! share its outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use super::{KeyMaterial, KeySetError, KeySetProvider, KeySetSnapshot};
use crate::config::KeySetConfig;

// =============================================================================
// State
// =============================================================================

/// Observable cache status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No snapshot has ever been loaded successfully.
    Empty,
    /// A snapshot within its TTL is available.
    Fresh,
    /// A refresh is in flight.
    Refreshing,
    /// The snapshot is past its TTL or its last refresh failed; it is still
    /// served until a refresh succeeds.
    StaleButUsable,
}

enum CacheState {
    Empty {
        last_error: Option<KeySetError>,
    },
    Fresh(Arc<KeySetSnapshot>),
    Refreshing {
        previous: Option<Arc<KeySetSnapshot>>,
    },
    StaleButUsable {
        snapshot: Arc<KeySetSnapshot>,
        retry_at: Instant,
    },
}

/// What a caller should do after inspecting the state.
enum Step {
    Serve(Arc<KeySetSnapshot>),
    Fail(KeySetError),
    /// Wait for the in-flight refresh; carries the completed-refresh count
    /// observed when waiting started.
    Wait(u64),
    Refresh,
}

struct Inner {
    state: CacheState,
    completed_refreshes: u64,
}

impl Inner {
    fn step(&self, now: Instant, ttl: Duration, waited_since: Option<u64>) -> Step {
        match &self.state {
            CacheState::Fresh(snapshot) if !snapshot.is_expired(now, ttl) => {
                Step::Serve(Arc::clone(snapshot))
            }
            CacheState::Fresh(_) => Step::Refresh,
            CacheState::Refreshing {
                previous: Some(snapshot),
            } => Step::Serve(Arc::clone(snapshot)),
            CacheState::Refreshing { previous: None } => Step::Wait(self.completed_refreshes),
            CacheState::StaleButUsable { snapshot, retry_at } if now < *retry_at => {
                Step::Serve(Arc::clone(snapshot))
            }
            CacheState::StaleButUsable { .. } => Step::Refresh,
            CacheState::Empty { last_error } => match (waited_since, last_error) {
                // The refresh we waited on failed; share its outcome.
                (Some(seen), Some(err)) if self.completed_refreshes > seen => {
                    Step::Fail(err.clone())
                }
                _ => Step::Refresh,
            },
        }
    }

    fn begin_refresh(&mut self) -> Option<Arc<KeySetSnapshot>> {
        let previous = match std::mem::replace(
            &mut self.state,
            CacheState::Refreshing { previous: None },
        ) {
            CacheState::Fresh(snapshot) | CacheState::StaleButUsable { snapshot, .. } => {
                Some(snapshot)
            }
            CacheState::Refreshing { previous } => previous,
            CacheState::Empty { .. } => None,
        };
        self.state = CacheState::Refreshing {
            previous: previous.clone(),
        };
        previous
    }
}

struct Shared {
    provider: Arc<dyn KeySetProvider>,
    ttl: Duration,
    fetch_timeout: Duration,
    retry_interval: Duration,
    inner: RwLock<Inner>,
    refreshed: Notify,
}

// =============================================================================
// Key Set Cache
// =============================================================================

/// TTL cache of the issuer's signing keys with single-flight refresh.
///
/// Cloning is cheap and clones share the same snapshot.
///
/// # Example
///
/// ```ignore
/// let provider = Arc::new(HttpKeySetProvider::from_config(&config.key_set)?);
/// let cache = KeySetCache::new(provider, &config.key_set);
///
/// let key = cache.resolve("2024-rotation-a").await?;
/// ```
#[derive(Clone)]
pub struct KeySetCache {
    shared: Arc<Shared>,
}

impl KeySetCache {
    /// Creates an empty cache. Nothing is fetched until the first resolve.
    #[must_use]
    pub fn new(provider: Arc<dyn KeySetProvider>, config: &KeySetConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                ttl: config.cache_ttl,
                fetch_timeout: config.fetch_timeout,
                retry_interval: config.retry_interval,
                inner: RwLock::new(Inner {
                    state: CacheState::Empty { last_error: None },
                    completed_refreshes: 0,
                }),
                refreshed: Notify::new(),
            }),
        }
    }

    /// Resolves the key with id `kid`.
    ///
    /// Refreshes first if the snapshot is missing or stale. A kid that is
    /// absent after that is reported as `KeyNotFound` without a second
    /// refresh.
    ///
    /// # Errors
    ///
    /// - `KeySetError::KeyNotFound` if the current snapshot has no such key
    /// - any provider or parsing error if no snapshot has ever been loaded
    pub async fn resolve(&self, kid: &str) -> Result<Arc<KeyMaterial>, KeySetError> {
        let snapshot = self.snapshot().await?;
        snapshot
            .find(kid)
            .cloned()
            .ok_or_else(|| KeySetError::KeyNotFound(kid.to_string()))
    }

    /// Returns the snapshot to verify against, refreshing if needed.
    ///
    /// # Errors
    ///
    /// Fails only when no snapshot has ever been loaded and the refresh
    /// attempt (ours, or the one we waited for) failed.
    pub async fn snapshot(&self) -> Result<Arc<KeySetSnapshot>, KeySetError> {
        let mut waited_since = None;

        loop {
            // Registered before the state is read so a refresh finishing in
            // between cannot be missed.
            let refreshed = self.shared.refreshed.notified();

            let step = {
                let inner = self.shared.inner.read().await;
                inner.step(Instant::now(), self.shared.ttl, waited_since)
            };
            match step {
                Step::Serve(snapshot) => return Ok(snapshot),
                Step::Fail(err) => return Err(err),
                Step::Wait(seen) => {
                    waited_since = Some(seen);
                    refreshed.await;
                    continue;
                }
                Step::Refresh => {}
            }

            // Upgrade and re-check: another caller may have refreshed or
            // started refreshing since the read lock was released.
            let previous = {
                let mut inner = self.shared.inner.write().await;
                match inner.step(Instant::now(), self.shared.ttl, waited_since) {
                    Step::Serve(snapshot) => return Ok(snapshot),
                    Step::Fail(err) => return Err(err),
                    Step::Wait(seen) => {
                        drop(inner);
                        waited_since = Some(seen);
                        refreshed.await;
                        continue;
                    }
                    Step::Refresh => inner.begin_refresh(),
                }
            };

            return self.run_refresh(previous).await;
        }
    }

    /// Loads the key set eagerly and returns the number of usable keys.
    ///
    /// # Errors
    ///
    /// Same as [`KeySetCache::snapshot`].
    pub async fn warm_up(&self) -> Result<usize, KeySetError> {
        Ok(self.snapshot().await?.len())
    }

    /// Marks the current snapshot stale so the next resolve refreshes it.
    ///
    /// The snapshot keeps being served if that refresh fails.
    pub async fn invalidate(&self) {
        let mut inner = self.shared.inner.write().await;
        let snapshot = match &inner.state {
            CacheState::Fresh(snapshot) | CacheState::StaleButUsable { snapshot, .. } => {
                Arc::clone(snapshot)
            }
            CacheState::Empty { .. } | CacheState::Refreshing { .. } => return,
        };
        inner.state = CacheState::StaleButUsable {
            snapshot,
            retry_at: Instant::now(),
        };
    }

    /// Current cache status.
    pub async fn status(&self) -> CacheStatus {
        let inner = self.shared.inner.read().await;
        match &inner.state {
            CacheState::Empty { .. } => CacheStatus::Empty,
            CacheState::Fresh(snapshot) if !snapshot.is_expired(Instant::now(), self.shared.ttl) => {
                CacheStatus::Fresh
            }
            CacheState::Fresh(_) | CacheState::StaleButUsable { .. } => CacheStatus::StaleButUsable,
            CacheState::Refreshing { .. } => CacheStatus::Refreshing,
        }
    }

    /// Configured snapshot TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// Runs the provider fetch on its own task so that a cancelled request
    /// cannot leave the cache stuck in `Refreshing`.
    async fn run_refresh(
        &self,
        previous: Option<Arc<KeySetSnapshot>>,
    ) -> Result<Arc<KeySetSnapshot>, KeySetError> {
        let shared = Arc::clone(&self.shared);
        let task_previous = previous.clone();
        let task = tokio::spawn(async move { shared.refresh(task_previous).await });

        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                let err = KeySetError::RefreshAborted(join_error.to_string());
                self.shared.complete(previous, Err(err)).await
            }
        }
    }
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetCache")
            .field("ttl", &self.shared.ttl)
            .field("fetch_timeout", &self.shared.fetch_timeout)
            .field("retry_interval", &self.shared.retry_interval)
            .finish_non_exhaustive()
    }
}

impl Shared {
    #[tracing::instrument(name = "key_set.refresh", skip_all, fields(has_previous = previous.is_some()))]
    async fn refresh(
        &self,
        previous: Option<Arc<KeySetSnapshot>>,
    ) -> Result<Arc<KeySetSnapshot>, KeySetError> {
        let outcome = match tokio::time::timeout(self.fetch_timeout, self.provider.fetch()).await {
            Ok(Ok(entries)) => {
                let fetched = entries.len();
                KeySetSnapshot::from_entries(&entries, Instant::now()).map(|snapshot| {
                    if snapshot.len() < fetched {
                        tracing::info!(
                            keys = snapshot.len(),
                            dropped = fetched - snapshot.len(),
                            "Key set contained unusable entries"
                        );
                    }
                    Arc::new(snapshot)
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(KeySetError::Timeout(self.fetch_timeout)),
        };
        self.complete(previous, outcome).await
    }

    async fn complete(
        &self,
        previous: Option<Arc<KeySetSnapshot>>,
        outcome: Result<Arc<KeySetSnapshot>, KeySetError>,
    ) -> Result<Arc<KeySetSnapshot>, KeySetError> {
        let mut inner = self.inner.write().await;
        inner.completed_refreshes += 1;

        let result = match (outcome, previous) {
            (Ok(snapshot), _) => {
                tracing::debug!(keys = snapshot.len(), ttl = ?self.ttl, "Key set refreshed");
                inner.state = CacheState::Fresh(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            (Err(err), Some(snapshot)) => {
                tracing::warn!(
                    error = %err,
                    keys = snapshot.len(),
                    retry_in = ?self.retry_interval,
                    "Key set refresh failed, serving previous snapshot"
                );
                inner.state = CacheState::StaleButUsable {
                    snapshot: Arc::clone(&snapshot),
                    retry_at: Instant::now() + self.retry_interval,
                };
                Ok(snapshot)
            }
            (Err(err), None) => {
                tracing::warn!(error = %err, "Key set refresh failed and no snapshot is available");
                inner.state = CacheState::Empty {
                    last_error: Some(err.clone()),
                };
                Err(err)
            }
        };

        drop(inner);
        self.refreshed.notify_waiters();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_set::JwkEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const N: &str = "xjlCRBqkGPbkzA1ucTj7oJwlSdLjUp6tkcUOdR4o3_mRGuJAdBUwWpOaUzTmsvl-LBzZHhbXKOFS3sHsu0CbPQ";
    const E: &str = "AQAB";

    struct ScriptedProvider {
        calls: AtomicUsize,
        response: Mutex<Result<Vec<JwkEntry>, KeySetError>>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(kids: &[&str]) -> Arc<Self> {
            Self::with_delay(kids, Duration::ZERO)
        }

        fn with_delay(kids: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(Ok(entries(kids))),
                delay,
            })
        }

        fn set(&self, response: Result<Vec<JwkEntry>, KeySetError>) {
            *self.response.lock().unwrap() = response;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySetProvider for ScriptedProvider {
        async fn fetch(&self) -> Result<Vec<JwkEntry>, KeySetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.lock().unwrap().clone()
        }
    }

    fn entries(kids: &[&str]) -> Vec<JwkEntry> {
        kids.iter().map(|kid| JwkEntry::rsa(*kid, N, E)).collect()
    }

    fn config() -> KeySetConfig {
        KeySetConfig::default()
            .with_cache_ttl(Duration::from_secs(300))
            .with_fetch_timeout(Duration::from_secs(5))
            .with_retry_interval(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_once() {
        let provider = ScriptedProvider::new(&["a", "b"]);
        let cache = KeySetCache::new(provider.clone(), &config());
        assert_eq!(cache.status().await, CacheStatus::Empty);

        assert_eq!(cache.resolve("a").await.unwrap().kid(), "a");
        assert_eq!(cache.resolve("b").await.unwrap().kid(), "b");
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.status().await, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn test_unknown_kid_does_not_refetch_fresh_snapshot() {
        let provider = ScriptedProvider::new(&["a"]);
        let cache = KeySetCache::new(provider.clone(), &config());

        for _ in 0..3 {
            let err = cache.resolve("zzz").await.unwrap_err();
            assert_eq!(err, KeySetError::KeyNotFound("zzz".to_string()));
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_out_key_is_not_found_after_ttl() {
        let provider = ScriptedProvider::new(&["a"]);
        let cache = KeySetCache::new(provider.clone(), &config());
        assert!(cache.resolve("a").await.is_ok());

        provider.set(Ok(entries(&["b"])));
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.status().await, CacheStatus::StaleButUsable);

        let err = cache.resolve("a").await.unwrap_err();
        assert_eq!(err, KeySetError::KeyNotFound("a".to_string()));
        assert!(cache.resolve("b").await.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let provider = ScriptedProvider::new(&["a"]);
        let cache = KeySetCache::new(provider.clone(), &config());
        assert!(cache.resolve("a").await.is_ok());

        provider.set(Err(KeySetError::Provider("down".to_string())));
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(cache.resolve("a").await.is_ok());
        assert_eq!(cache.status().await, CacheStatus::StaleButUsable);
        assert_eq!(provider.calls(), 2);

        // Within the retry interval the stale snapshot is served without a fetch.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.resolve("a").await.is_ok());
        assert_eq!(provider.calls(), 2);

        provider.set(Ok(entries(&["a"])));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.resolve("a").await.is_ok());
        assert_eq!(provider.calls(), 3);
        assert_eq!(cache.status().await, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_snapshot_is_fatal_until_success() {
        let provider = ScriptedProvider::new(&[]);
        provider.set(Err(KeySetError::HttpStatus(502)));
        let cache = KeySetCache::new(provider.clone(), &config());

        assert_eq!(
            cache.resolve("a").await.unwrap_err(),
            KeySetError::HttpStatus(502)
        );
        assert_eq!(cache.status().await, CacheStatus::Empty);

        // Each new request retries while nothing has ever been loaded.
        provider.set(Ok(entries(&["a"])));
        assert!(cache.resolve("a").await.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_usable_keys_fails_refresh() {
        let provider = ScriptedProvider::new(&[]);
        provider.set(Ok(vec![JwkEntry::rsa("bad", "***", E)]));
        let cache = KeySetCache::new(provider, &config());

        assert_eq!(cache.warm_up().await, Err(KeySetError::NoUsableKeys));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = ScriptedProvider::with_delay(&["a"], Duration::from_secs(30));
        let cache = KeySetCache::new(provider, &config());

        let err = cache.resolve("a").await.unwrap_err();
        assert_eq!(err, KeySetError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let provider = ScriptedProvider::new(&["a"]);
        let cache = KeySetCache::new(provider.clone(), &config());
        assert_eq!(cache.warm_up().await, Ok(1));

        cache.invalidate().await;
        assert_eq!(cache.status().await, CacheStatus::StaleButUsable);
        assert!(cache.resolve("a").await.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_cold_start_is_single_flight() {
        let provider = ScriptedProvider::with_delay(&["a"], Duration::from_millis(50));
        let cache = KeySetCache::new(provider.clone(), &config());

        let tasks: Vec<_> = (0..128)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("a").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_cold_start_failure_is_shared() {
        let provider = ScriptedProvider::with_delay(&[], Duration::from_millis(50));
        provider.set(Err(KeySetError::Provider("unreachable".to_string())));
        let cache = KeySetCache::new(provider.clone(), &config());

        let tasks: Vec<_> = (0..128)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("a").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(
                task.await.unwrap().unwrap_err(),
                KeySetError::Provider("unreachable".to_string())
            );
        }
        assert_eq!(provider.calls(), 1);
    }

    struct GatedProvider {
        calls: AtomicUsize,
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl KeySetProvider for GatedProvider {
        async fn fetch(&self) -> Result<Vec<JwkEntry>, KeySetError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            Ok(entries(&["a"]))
        }
    }

    #[tokio::test]
    async fn test_readers_use_previous_snapshot_during_refresh() {
        let provider = Arc::new(GatedProvider {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let cache = KeySetCache::new(provider.clone(), &config());
        assert!(cache.warm_up().await.is_ok());
        cache.invalidate().await;

        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("a").await })
        };
        provider.entered.notified().await;

        assert_eq!(cache.status().await, CacheStatus::Refreshing);
        assert!(cache.resolve("a").await.is_ok());

        provider.gate.notify_one();
        assert!(refresher.await.unwrap().is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.status().await, CacheStatus::Fresh);
    }
}
