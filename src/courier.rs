//! Single-flight read-through loader backing `fetch` (§4.G).
//!
//! The teacher's `strategy.rs` `ReadThroughCache` populates missing keys but
//! has no in-flight deduplication — concurrent misses on the same key would
//! each invoke the loader. `tokio::sync::OnceCell::get_or_init` already
//! gives exactly the single-flight contract §4.G asks for (one winner runs
//! the future, every other caller awaits its result), so the dedup here is
//! built on that primitive instead of a hand-rolled waiter list.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::entry::Value;

/// What a loader asks the cache to do with the value it produced.
#[derive(Debug, Clone)]
pub enum LoaderOutcome {
    /// Store under the cache's default options and return the value.
    Commit(Value),
    /// Store with the given per-call expiration and return the value.
    CommitWithExpiration(Value, Option<Duration>),
    /// Return the value without storing it.
    Ignore(Value),
}

/// Single-flight coordinator for read-through loads.
pub struct Courier<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    in_flight: DashMap<K, Arc<OnceCell<Result<LoaderOutcome, String>>>>,
}

impl<K> Courier<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Construct a courier with no in-flight loads.
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Number of loads currently in flight (diagnostic only).
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Run `loader` for `key`, deduplicated against any other in-flight
    /// load for the same key. `loader` is invoked at most once per
    /// in-flight window; every attached caller receives a clone of the same
    /// outcome. On loader panic the in-flight entry is dropped so the next
    /// call starts a fresh load rather than hanging forever.
    pub async fn load<F, Fut>(&self, key: &K, loader: F) -> Result<LoaderOutcome, String>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<LoaderOutcome, String>>,
    {
        let cell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let key_for_loader = key.clone();
        let result = cell
            .get_or_init(|| async move { loader(key_for_loader).await })
            .await
            .clone();

        self.in_flight.remove_if(key, |_, existing| Arc::ptr_eq(existing, &cell));

        result
    }
}

impl<K> Default for Courier<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn concurrent_loads_invoke_loader_exactly_once() {
        let courier: Arc<Courier<String>> = Arc::new(Courier::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let c = courier.clone();
            let inv = invocations.clone();
            handles.push(tokio::spawn(async move {
                c.load(&"k".to_string(), move |_key| {
                    let inv = inv.clone();
                    async move {
                        inv.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(30)).await;
                        Ok(LoaderOutcome::Commit(Value::Int(42)))
                    }
                })
                .await
            }));
        }

        for h in handles {
            let outcome = h.await.unwrap().unwrap();
            match outcome {
                LoaderOutcome::Commit(Value::Int(v)) => assert_eq!(v, 42),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(courier.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn sequential_loads_after_completion_run_again() {
        let courier: Courier<String> = Courier::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let inv = invocations.clone();
            courier
                .load(&"k".to_string(), move |_key| {
                    let inv = inv.clone();
                    async move {
                        inv.fetch_add(1, Ordering::SeqCst);
                        Ok(LoaderOutcome::Commit(Value::Int(1)))
                    }
                })
                .await
                .unwrap();
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }
}
