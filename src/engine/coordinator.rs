use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::EngineError;
use crate::store::{BookingStore, Tx};

/// Attempts per serializable unit of work: one initial run plus two retries.
pub const MAX_TX_ATTEMPTS: u32 = 3;

/// Named advisory locks, exclusive and transaction-scoped. Keys are acquired
/// in sorted order with duplicates and empty keys removed; the deterministic
/// order is what makes deadlock between two writers needing the same pair of
/// resources impossible.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self { table: Arc::new(DashMap::new()) }
    }

    /// Sorted, deduplicated, non-empty lock keys: the acquisition order.
    pub fn normalize_keys(keys: &[String]) -> Vec<String> {
        let mut keys: Vec<String> = keys.iter().filter(|k| !k.is_empty()).cloned().collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub async fn acquire(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let keys = Self::normalize_keys(keys);
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = {
                let entry = self.table.entry(key).or_default();
                entry.value().clone()
            };
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Serialization point for all booking writes: wraps a unit of work in a
/// transaction with bounded retry and hands out the advisory lock table.
pub struct Coordinator {
    locks: LockManager,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self { locks: LockManager::new() }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Run `work` inside a transaction at the store's strictest isolation.
    ///
    /// A retryable failure (serialization conflict from a concurrent commit)
    /// re-runs the entire unit of work, up to [`MAX_TX_ATTEMPTS`] attempts in
    /// total; the final failure propagates the original error. Business
    /// errors raised by the unit of work propagate immediately.
    ///
    /// The unit of work must be idempotent up to its commit: it runs again
    /// on retry, so side effects that escape the transaction (notifications)
    /// belong after this call returns.
    pub async fn run_serializable<T, F>(
        &self,
        store: &Arc<BookingStore>,
        work: F,
    ) -> Result<T, EngineError>
    where
        F: for<'a> Fn(&'a mut Tx) -> BoxFuture<'a, Result<T, EngineError>>,
    {
        if !store.supports_transactions() {
            // Reduced-safety fallback: one direct run, no isolation, no retry.
            warn!("store has no transaction support; running unit of work without isolation");
            let mut tx = store.begin(self.locks.clone()).await;
            let value = work(&mut tx).await?;
            tx.commit().await?;
            return Ok(value);
        }

        for attempt in 1..=MAX_TX_ATTEMPTS {
            let mut tx = store.begin(self.locks.clone()).await;
            let result = match work(&mut tx).await {
                Ok(value) => tx.commit().await.map(|()| value),
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_TX_ATTEMPTS => {
                    metrics::counter!(crate::observability::TX_RETRIES_TOTAL).increment(1);
                    warn!(attempt, "retrying serializable unit of work: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::FutureExt;
    use ulid::Ulid;

    #[test]
    fn keys_are_sorted_deduped_and_non_empty() {
        let keys = vec![
            "staff:B".to_string(),
            "staff:A".to_string(),
            "staff:B".to_string(),
            String::new(),
            "staff:C".to_string(),
        ];
        assert_eq!(
            LockManager::normalize_keys(&keys),
            vec!["staff:A".to_string(), "staff:B".to_string(), "staff:C".to_string()]
        );
    }

    #[tokio::test]
    async fn acquire_is_exclusive_per_key() {
        let manager = LockManager::new();
        let key = vec!["staff:X".to_string()];

        let held = manager.acquire(&key).await;
        // A second acquisition must wait until the first guard drops.
        let manager2 = manager.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { manager2.acquire(&key2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let guards = waiter.await.unwrap();
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn opposite_key_orders_do_not_deadlock() {
        let manager = LockManager::new();
        let ab = vec!["client:1".to_string(), "staff:2".to_string()];
        let ba = vec!["staff:2".to_string(), "client:1".to_string()];

        let mut handles = Vec::new();
        for _ in 0..50 {
            let m = manager.clone();
            let keys = ab.clone();
            handles.push(tokio::spawn(async move {
                let _guards = m.acquire(&keys).await;
            }));
            let m = manager.clone();
            let keys = ba.clone();
            handles.push(tokio::spawn(async move {
                let _guards = m.acquire(&keys).await;
            }));
        }
        for h in handles {
            tokio::time::timeout(std::time::Duration::from_secs(5), h)
                .await
                .expect("lock acquisition deadlocked")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn retryable_failure_is_attempted_exactly_three_times() {
        let coordinator = Coordinator::new();
        let store = Arc::new(BookingStore::new());
        let attempts = AtomicU32::new(0);

        let result: Result<(), EngineError> = coordinator
            .run_serializable(&store, |_tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::SerializationConflict) }.boxed()
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // The original error is propagated, not a wrapper.
        assert_eq!(result.unwrap_err(), EngineError::SerializationConflict);
    }

    #[tokio::test]
    async fn business_error_propagates_without_retry() {
        let coordinator = Coordinator::new();
        let store = Arc::new(BookingStore::new());
        let attempts = AtomicU32::new(0);
        let salon_id = Ulid::new();

        let result: Result<(), EngineError> = coordinator
            .run_serializable(&store, |_tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(EngineError::SalonNotFound(salon_id)) }.boxed()
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err(), EngineError::SalonNotFound(salon_id));
    }

    #[tokio::test]
    async fn success_returns_the_work_value() {
        let coordinator = Coordinator::new();
        let store = Arc::new(BookingStore::new());

        let value = coordinator
            .run_serializable(&store, |_tx| async { Ok(42u32) }.boxed())
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn non_transactional_store_runs_once_without_retry() {
        let coordinator = Coordinator::new();
        let store = Arc::new(BookingStore::without_transactions());
        let attempts = AtomicU32::new(0);

        let result: Result<(), EngineError> = coordinator
            .run_serializable(&store, |_tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::SerializationConflict) }.boxed()
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }
}
