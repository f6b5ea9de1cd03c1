//! Singleflight: concurrent calls with the same key share one execution

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` unless a call for `key` is already in flight, in which case
    /// wait for it and return its value. The flag is true for callers that
    /// received a shared result.
    ///
    /// If the executing caller is dropped mid-flight, one of the waiters
    /// takes over and runs its own `f`.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                calls
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };
        let guard = Abandon {
            calls: &self.calls,
            key,
            cell,
        };

        let mut executed = false;
        let value = guard
            .cell
            .get_or_init(|| {
                executed = true;
                f()
            })
            .await
            .clone();

        if executed {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            if calls.get(key).is_some_and(|c| Arc::ptr_eq(c, &guard.cell)) {
                calls.remove(key);
            }
        }

        (value, !executed)
    }

    /// Keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Removes the key when the last caller waiting on an unset cell goes away,
/// so cancelled calls do not pin map entries.
struct Abandon<'a, T> {
    calls: &'a Mutex<HashMap<String, Arc<OnceCell<T>>>>,
    key: &'a str,
    cell: Arc<OnceCell<T>>,
}

impl<T> Drop for Abandon<'_, T> {
    fn drop(&mut self) {
        if self.cell.initialized() {
            return;
        }

        // Clones are only made under this lock, so the count is stable here
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let ours = calls.get(self.key).is_some_and(|c| Arc::ptr_eq(c, &self.cell));
        // Release our handle before counting the remaining waiters
        self.cell = Arc::new(OnceCell::new());
        if ours && calls.get(self.key).is_some_and(|c| Arc::strong_count(c) == 1) {
            calls.remove(self.key);
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_execution() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let executions = Arc::clone(&executions);
                tokio::spawn(async move {
                    flight
                        .run("k", || async move {
                            executions.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            7
                        })
                        .await
                })
            })
            .collect();

        let mut shared = 0;
        for task in tasks {
            let (value, was_shared) = task.await.unwrap();
            assert_eq!(value, 7);
            shared += usize::from(was_shared);
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 9);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flight = SingleFlight::<u32>::new();
        let (a, _) = flight.run("k", || async { 1 }).await;
        let (b, shared) = flight.run("k", || async { 2 }).await;
        assert_eq!((a, b), (1, 2));
        assert!(!shared);
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let flight = SingleFlight::<&'static str>::new();
        let (a, b) = tokio::join!(
            flight.run("a", || async { "a" }),
            flight.run("b", || async { "b" })
        );
        assert_eq!((a.0, b.0), ("a", "b"));
    }

    #[tokio::test]
    async fn test_dropped_leader_hands_over() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        std::future::pending::<()>().await;
                        0
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("k", || async { 42 }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let (value, _) = follower.await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_cancelled_lone_caller_releases_key() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        std::future::pending::<()>().await;
                        0
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(flight.in_flight(), 1);

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_distinct_keys_do_not_accumulate() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let flight = Arc::clone(&flight);
                tokio::spawn(async move {
                    flight
                        .run(&format!("user-{}", i), || async {
                            std::future::pending::<()>().await;
                            0
                        })
                        .await
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(flight.in_flight(), 50);

        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_and_waiter_release_key() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let spawn_pending = |flight: Arc<SingleFlight<u32>>| {
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        std::future::pending::<()>().await;
                        0
                    })
                    .await
            })
        };
        let leader = spawn_pending(Arc::clone(&flight));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = spawn_pending(Arc::clone(&flight));
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        let _ = leader.await;
        assert_eq!(flight.in_flight(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(flight.in_flight(), 0);

        let (value, shared) = flight.run("k", || async { 5 }).await;
        assert_eq!(value, 5);
        assert!(!shared);
    }
}
