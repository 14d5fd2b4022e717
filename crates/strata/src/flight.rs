// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Coalescing of duplicate in-flight loads.
//!
//! [`FlightGroup`] collapses N concurrent executions for the same key
//! into one: the first caller to acquire a key's slot runs the work while
//! the rest block on the slot and clone the stored result. The slot is
//! unmapped before the result is handed out, so a retry after a failed
//! load starts a fresh execution instead of replaying the stored error.
//!
//! Cancellation-safe: if the executing caller is dropped mid-work, the
//! slot lock releases and the next waiter finds the slot empty, promoting
//! itself to executor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

struct FlightSlot<T> {
    value: AsyncMutex<Option<T>>,
}

/// A space in which units of work keyed by cache key execute with
/// duplicate suppression.
pub(crate) struct FlightGroup<T> {
    inflight: SyncMutex<HashMap<String, Arc<FlightSlot<T>>>>,
}

impl<T> FlightGroup<T> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: SyncMutex::new(HashMap::new()),
        }
    }

    /// Number of keys with an outstanding execution. Test hook.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T: Clone> FlightGroup<T> {
    /// Executes `func` for `key`, or waits on the execution already in
    /// flight for that key and returns a clone of its result.
    pub(crate) async fn work<F, Fut>(&self, key: &str, func: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = {
            let mut map = self.inflight.lock();
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(FlightSlot { value: AsyncMutex::new(None) })),
            )
        };

        // Whoever holds the slot lock and finds it empty is the executor;
        // everyone else blocks here until a result is stored.
        let mut guard = slot.value.lock().await;
        if let Some(result) = guard.as_ref() {
            return result.clone();
        }

        let result = func().await;
        *guard = Some(result.clone());

        // Unmap before waking waiters: callers arriving after this point
        // start a fresh execution, which is what allows a retry after an
        // error result.
        self.inflight.lock().remove(key);
        drop(guard);
        result
    }
}

impl<T> fmt::Debug for FlightGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.inflight.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn single_caller_executes_once() {
        let group: FlightGroup<u32> = FlightGroup::new();
        let result = group.work("k", || async { 42 }).await;
        assert_eq!(result, 42);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_execution() {
        let group: Arc<FlightGroup<u32>> = Arc::new(FlightGroup::new());
        let executions = Arc::new(AtomicU32::new(0));

        let mut join_set = JoinSet::new();
        for _ in 0..32 {
            let group = Arc::clone(&group);
            let executions = Arc::clone(&executions);
            join_set.spawn(async move {
                group
                    .work("k", || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        7
                    })
                    .await
            });
        }

        while let Some(result) = join_set.join_next().await {
            assert_eq!(result.expect("join"), 7);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let group: Arc<FlightGroup<String>> = Arc::new(FlightGroup::new());
        let (a, b) = tokio::join!(
            group.work("a", || async { "first".to_string() }),
            group.work("b", || async { "second".to_string() }),
        );
        assert_eq!(a, "first");
        assert_eq!(b, "second");
    }

    #[tokio::test]
    async fn completed_flight_allows_a_fresh_execution() {
        let group: FlightGroup<Result<u32, String>> = FlightGroup::new();

        let first = group.work("k", || async { Err::<u32, _>("boom".to_string()) }).await;
        assert!(first.is_err());

        // The failed flight is unmapped; a retry runs the new closure.
        let second = group.work("k", || async { Ok::<_, String>(9) }).await;
        assert_eq!(second, Ok(9));
    }
}
