//! Replay protection over pluggable nonce stores.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{ReplayBackend, Settings};
use crate::error::{GatewayError, StoreErrorKind};

use super::nonce::MemoryNonceStore;
use super::redis_store::RedisNonceStore;

/// Default bound on a single store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// A backend able to record a key with a TTL atomically.
///
/// `insert_if_absent` must be a single indivisible check-and-set: returning
/// `Ok(true)` for the same live key to two callers is a correctness bug.
#[async_trait]
pub trait ReplayStore: Send + Sync + fmt::Debug {
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreErrorKind>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Build the replay key for a nonce, scoped by secret version.
///
/// The scope is length-prefixed so a `:` inside a version name cannot make
/// two different (version, nonce) pairs share a key.
pub fn replay_key(scope: &str, nonce: &str) -> String {
    format!("{}:{}:{}", scope.len(), scope, nonce)
}

/// Admits each replay key at most once within its TTL.
///
/// Store failures fail closed unless a local fallback store is configured.
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    primary: Arc<dyn ReplayStore>,
    fallback: Option<Arc<MemoryNonceStore>>,
    timeout: Duration,
}

impl ReplayGuard {
    /// Guard backed only by an in-process store.
    pub fn local(store: Arc<MemoryNonceStore>) -> Self {
        Self {
            primary: store,
            fallback: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Guard backed by a shared store.
    pub fn shared(store: Arc<dyn ReplayStore>) -> Self {
        Self {
            primary: store,
            fallback: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Answer from `store` whenever the primary store fails.
    pub fn with_fallback(mut self, store: Arc<MemoryNonceStore>) -> Self {
        self.fallback = Some(store);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the guard described by the `[replay]` and `[redis]` settings.
    pub async fn from_settings(
        settings: &Settings,
        local: Arc<MemoryNonceStore>,
    ) -> Result<Self, GatewayError> {
        let replay = &settings.replay;
        let guard = match replay.backend {
            ReplayBackend::Memory => {
                info!("Replay protection using in-memory nonce store");
                Self::local(local)
            }
            ReplayBackend::Redis => {
                let connect_timeout = Duration::from_millis(settings.redis.connect_timeout_ms);
                let connected = tokio::time::timeout(
                    connect_timeout,
                    RedisNonceStore::connect(&settings.redis.url, &settings.redis.key_prefix),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(GatewayError::Store {
                        kind: StoreErrorKind::Timeout {
                            timeout_ms: settings.redis.connect_timeout_ms,
                        },
                    })
                });

                match connected {
                    Ok(store) => {
                        info!(
                            fallback = replay.local_fallback,
                            "Replay protection using shared Redis nonce store"
                        );
                        let guard = Self::shared(Arc::new(store));
                        if replay.local_fallback {
                            guard.with_fallback(local)
                        } else {
                            guard
                        }
                    }
                    Err(e) if replay.local_fallback => {
                        warn!(
                            error = %e,
                            "Redis nonce store unavailable at startup, using local fallback"
                        );
                        Self::local(local)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(guard.with_timeout(Duration::from_millis(replay.store_timeout_ms)))
    }

    /// Admit `key` for `ttl`.
    ///
    /// `Ok(true)` exactly once per key within the TTL, `Ok(false)` for a
    /// replay, `Err` when no store could give a trustworthy answer.
    pub async fn admit(&self, key: &str, ttl: Duration) -> Result<bool, GatewayError> {
        let attempt = tokio::time::timeout(self.timeout, self.primary.insert_if_absent(key, ttl));
        let result = match attempt.await {
            Ok(result) => result,
            Err(_) => Err(StoreErrorKind::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(admitted) => Ok(admitted),
            Err(kind) => match &self.fallback {
                Some(local) => {
                    warn!(
                        backend = self.primary.backend(),
                        error = %kind,
                        "Replay store failed, answering from local fallback"
                    );
                    local
                        .admit(key, ttl)
                        .map_err(|kind| GatewayError::Store { kind })
                }
                None => Err(GatewayError::Store { kind }),
            },
        }
    }

    /// Name of the primary backend.
    pub fn backend(&self) -> &'static str {
        self.primary.backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TTL: Duration = Duration::from_secs(300);

    /// Shared-store stand-in that can be switched offline.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryNonceStore,
        offline: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl ReplayStore for FlakyStore {
        async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreErrorKind> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreErrorKind::Unreachable {
                    message: "connection refused".to_string(),
                });
            }
            self.inner.admit(key, ttl)
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_replay_key_scoped_by_version() {
        assert_eq!(replay_key("v1", "n1"), "2:v1:n1");
        assert_ne!(replay_key("v1", "n1"), replay_key("v2", "n1"));
    }

    #[test]
    fn test_replay_key_colon_in_version_does_not_collide() {
        assert_ne!(replay_key("a:b", "c"), replay_key("a", "b:c"));
        assert_ne!(replay_key("", "a:b"), replay_key("a", "b"));
    }

    #[tokio::test]
    async fn test_local_guard_admits_once() {
        let guard = ReplayGuard::local(Arc::new(MemoryNonceStore::default()));
        assert!(guard.admit("v1:n1", TTL).await.unwrap());
        assert!(!guard.admit("v1:n1", TTL).await.unwrap());
        assert!(guard.admit("v2:n1", TTL).await.unwrap());
        assert_eq!(guard.backend(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_closed() {
        let store = Arc::new(FlakyStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let guard = ReplayGuard::shared(store);

        let err = guard.admit("v1:n1", TTL).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Store {
                kind: StoreErrorKind::Unreachable { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_uses_configured_fallback() {
        let store = Arc::new(FlakyStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let guard = ReplayGuard::shared(store)
            .with_fallback(Arc::new(MemoryNonceStore::default()));

        assert!(guard.admit("v1:n1", TTL).await.unwrap());
        assert!(!guard.admit("v1:n1", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_times_out() {
        let store = Arc::new(FlakyStore::default());
        store.hang.store(true, Ordering::SeqCst);
        let guard = ReplayGuard::shared(store).with_timeout(Duration::from_millis(50));

        let err = guard.admit("v1:n1", TTL).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Store {
                kind: StoreErrorKind::Timeout { timeout_ms: 50 }
            }
        ));
    }

    #[tokio::test]
    async fn test_memory_settings_build_local_guard() {
        let settings = Settings::default();
        let guard = ReplayGuard::from_settings(&settings, Arc::new(MemoryNonceStore::default()))
            .await
            .unwrap();
        assert_eq!(guard.backend(), "memory");
    }
}
