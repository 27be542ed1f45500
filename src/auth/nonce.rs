//! In-memory nonce store for replay attack prevention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::StoreErrorKind;

use super::replay::ReplayStore;

/// Default upper bound on live nonces held in memory.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Thread-safe in-memory nonce store with TTL-based expiry.
///
/// The check for an existing live key and the insert of a new one happen
/// under a single lock acquisition, so concurrent callers presenting the
/// same key can never both be admitted.
#[derive(Debug)]
pub struct MemoryNonceStore {
    /// Map of key -> expiry time.
    entries: Mutex<HashMap<String, Instant>>,
    max_entries: usize,
}

impl MemoryNonceStore {
    /// Create a new nonce store holding at most `max_entries` live keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Admit `key` for `ttl` if no live record exists.
    ///
    /// Returns `Ok(true)` the first time a key is seen within its TTL and
    /// `Ok(false)` for every later call before expiry. An expired record is
    /// treated as absent and overwritten.
    pub fn admit(&self, key: &str, ttl: Duration) -> Result<bool, StoreErrorKind> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if entries.get(key).is_some_and(|expiry| *expiry > now) {
            return Ok(false);
        }

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, expiry| *expiry > now);
            if entries.len() >= self.max_entries {
                return Err(StoreErrorKind::CapacityExhausted {
                    max_entries: self.max_entries,
                });
            }
        }

        entries.insert(key.to_owned(), now + ttl);
        Ok(true)
    }

    /// Get the current number of stored keys (for monitoring).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired keys. Returns how many were removed.
    ///
    /// Only entries whose expiry has passed are touched; a key inserted
    /// concurrently always carries a future expiry and survives.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        before - entries.len()
    }

    /// Start a background sweep task.
    ///
    /// The task holds only a weak reference to the store and ends on its own
    /// once the store is dropped. Use the returned handle to stop it during
    /// shutdown.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let store: Weak<Self> = Arc::downgrade(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        let removed = store.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = store.len(), "Expired nonces swept");
                        }
                    }
                }
            }
            debug!("Nonce sweep task stopped");
        });

        SweepHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

impl Default for MemoryNonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl ReplayStore for MemoryNonceStore {
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreErrorKind> {
        self.admit(key, ttl)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Owns the background sweep task of a [`MemoryNonceStore`].
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct SweepHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the sweep task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_new_key_accepted() {
        let store = MemoryNonceStore::default();
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(true));
        assert_eq!(store.admit("v1:nonce2", TTL), Ok(true));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let store = MemoryNonceStore::default();
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(true));
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(false));
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_admitted_again_after_ttl() {
        let store = MemoryNonceStore::default();
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(true));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(false));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.admit("v1:nonce1", TTL), Ok(true));
    }

    #[test]
    fn test_capacity_exhausted_fails_closed() {
        let store = MemoryNonceStore::new(2);
        assert_eq!(store.admit("a", TTL), Ok(true));
        assert_eq!(store.admit("b", TTL), Ok(true));
        assert_eq!(
            store.admit("c", TTL),
            Err(StoreErrorKind::CapacityExhausted { max_entries: 2 })
        );
        // Known keys are still answered.
        assert_eq!(store.admit("a", TTL), Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_reclaims_expired() {
        let store = MemoryNonceStore::new(1);
        assert_eq!(store.admit("a", Duration::from_secs(1)), Ok(true));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.admit("b", TTL), Ok(true));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryNonceStore::default();
        store.admit("short", Duration::from_secs(10)).unwrap();
        store.admit("long", Duration::from_secs(120)).unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.admit("long", TTL), Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_and_stop() {
        let store = Arc::new(MemoryNonceStore::default());
        store.admit("short", Duration::from_secs(30)).unwrap();
        store.admit("long", Duration::from_secs(600)).unwrap();

        let handle = store.start_sweep(Duration::from_secs(60));

        // Auto-advancing clock: the sweep tick at 60s runs before this wakes.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_stops_when_store_dropped() {
        let store = Arc::new(MemoryNonceStore::default());
        let handle = store.start_sweep(Duration::from_millis(5));
        drop(store);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweep task should exit once the store is gone");
    }

    #[test]
    fn test_concurrent_admit_single_winner() {
        let store = Arc::new(MemoryNonceStore::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.admit("v1:same", TTL).unwrap())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }
}
