//! Periodic Warmer runtime (§4.H).
//!
//! Grounded on the teacher's `strategy.rs` `WriteBehindCache` background
//! flush task (`tokio::spawn` + `tokio::time::interval` draining a write
//! queue) — generalized here from draining writes to periodically pulling
//! bulk entries from a user-supplied warmer.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::entry::Value;

/// What a warmer's `execute` produced this pass.
pub enum WarmResult<K> {
    /// Nothing to warm this pass.
    Ignore,
    /// Bulk pairs to insert via the standard `put_many` path, with their
    /// per-pair expiration (`None` uses the cache default).
    Pairs(Vec<(K, Value, Option<Duration>)>),
}

/// A periodic bulk loader.
#[async_trait]
pub trait Warmer<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Unique name within the cache.
    fn name(&self) -> &str;
    /// How often `execute` is invoked.
    fn interval(&self) -> Duration;
    /// Whether cache startup blocks on this warmer's first pass.
    fn required(&self) -> bool {
        false
    }
    /// Produce this pass's bulk entries.
    async fn execute(&self) -> WarmResult<K>;
}

/// Runs a fixed set of warmers, each on its own recurring timer.
pub struct WarmerRuntime<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    warmers: Vec<Arc<dyn Warmer<K>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl<K> WarmerRuntime<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Construct a runtime over the given warmer set.
    pub fn new(warmers: Vec<Arc<dyn Warmer<K>>>) -> Self {
        Self {
            warmers,
            handles: std::sync::Mutex::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run every `required` warmer's first pass synchronously (cache start
    /// waits for these), then spawn every warmer's recurring loop.
    /// `put_many` is the bulk-insert callback so hooks observe warmer
    /// writes the same as any other write (§4.H).
    pub async fn start(
        self: &Arc<Self>,
        put_many: impl Fn(Vec<(K, Value, Option<Duration>)>) + Send + Sync + 'static,
    ) {
        let put_many = Arc::new(put_many);

        for warmer in &self.warmers {
            if warmer.required() {
                Self::run_once(warmer.clone(), put_many.clone()).await;
            }
        }

        for warmer in &self.warmers {
            let warmer = warmer.clone();
            let put_many = put_many.clone();
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(warmer.interval());
                ticker.tick().await; // consume the immediate first tick; first pass already ran above
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            Self::run_once(warmer.clone(), put_many.clone()).await;
                        }
                        _ = shutdown.notified() => {
                            info!(warmer = warmer.name(), "warmer shutting down");
                            break;
                        }
                    }
                }
            });
            self.handles.lock().unwrap().push(handle);
        }
    }

    async fn run_once(
        warmer: Arc<dyn Warmer<K>>,
        put_many: Arc<dyn Fn(Vec<(K, Value, Option<Duration>)>) + Send + Sync>,
    ) {
        match warmer.execute().await {
            WarmResult::Ignore => {}
            WarmResult::Pairs(pairs) => {
                if pairs.is_empty() {
                    return;
                }
                let count = pairs.len();
                put_many(pairs);
                info!(warmer = warmer.name(), count, "warmer pass inserted entries");
            }
        }
    }

    /// Stop every warmer's loop.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FixedWarmer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Warmer<String> for FixedWarmer {
        fn name(&self) -> &str {
            "fixed"
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }
        fn required(&self) -> bool {
            true
        }
        async fn execute(&self) -> WarmResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            WarmResult::Pairs(vec![("a".to_string(), Value::Int(1), None)])
        }
    }

    #[tokio::test]
    async fn required_warmer_runs_before_start_returns() {
        let warmer = Arc::new(FixedWarmer {
            calls: AtomicUsize::new(0),
        });
        let runtime = Arc::new(WarmerRuntime::new(vec![warmer.clone()]));
        let inserted: Arc<StdMutex<Vec<(String, Value, Option<Duration>)>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let ins = inserted.clone();
        runtime
            .start(move |pairs| {
                ins.lock().unwrap().extend(pairs);
            })
            .await;

        assert_eq!(warmer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(inserted.lock().unwrap().len(), 1);
        runtime.stop();
    }
}
