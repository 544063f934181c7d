//! Least-recently-written eviction policy (§4.E).
//!
//! Grounded on the teacher's `tier.rs` `MultiTierCache::maintenance`/
//! `clean_expired` (periodic full-table scan over a `DashMap`, generalized
//! here from a promote/demote tiering decision down to a single bound:
//! reclaim entries until the table is back under `size_limit`.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::store::{EntryStore, MatchSpec};
use crate::time::Clock;

/// When the eviction pass runs.
#[derive(Debug, Clone, Copy)]
pub enum EvictionMode {
    /// Runs synchronously after every mutating operation (`cache.rs` calls
    /// [`EvictionPolicy::enforce`] from its post-write path).
    Evented,
    /// Runs on its own recurring timer, independent of write traffic.
    Scheduled(Duration),
}

/// Outcome of one eviction pass, delivered to observers as `{clear,
/// target_removal}` (§4.E item 5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Entries removed by the expiration purge step.
    pub expired_reclaimed: usize,
    /// Entries removed by LRW eviction proper.
    pub evicted: usize,
}

impl EvictionOutcome {
    /// Total entries removed this pass.
    pub fn total(&self) -> usize {
        self.expired_reclaimed + self.evicted
    }
}

/// Size-bound enforcement: LRW with reclaim headroom.
pub struct EvictionPolicy<K>
where
    K: Eq + Hash + Clone + Send + Sync + Ord + 'static,
{
    store: Arc<EntryStore<K>>,
    clock: Arc<dyn Clock>,
    size_limit: usize,
    reclaim_fraction: f64,
    mode: EvictionMode,
    on_evict: Box<dyn Fn(EvictionOutcome) + Send + Sync>,
    running: AtomicBool,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl<K> EvictionPolicy<K>
where
    K: Eq + Hash + Clone + Send + Sync + Ord + 'static,
{
    /// Construct a policy bounding the table to `size_limit` entries,
    /// reclaiming `reclaim_fraction` of `size_limit` per pass (default
    /// 0.1 per §3, but the caller supplies the resolved value).
    pub fn new(
        store: Arc<EntryStore<K>>,
        clock: Arc<dyn Clock>,
        size_limit: usize,
        reclaim_fraction: f64,
        mode: EvictionMode,
        on_evict: impl Fn(EvictionOutcome) + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock,
            size_limit,
            reclaim_fraction,
            mode,
            on_evict: Box::new(on_evict),
            running: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Whether this policy runs after every write rather than on a timer.
    pub fn is_evented(&self) -> bool {
        matches!(self.mode, EvictionMode::Evented)
    }

    /// Run one enforcement pass (§4.E steps 1-5). No-op if the table is at
    /// or under `size_limit`.
    #[instrument(skip(self))]
    pub fn enforce(&self) -> EvictionOutcome {
        let n = self.store.size();
        if n <= self.size_limit {
            return EvictionOutcome::default();
        }

        let reclaim_to = self.size_limit
            - ((self.size_limit as f64 * self.reclaim_fraction).round() as usize)
                .min(self.size_limit);
        let mut target_removal = n - reclaim_to;

        let now = self.clock.now_ms();
        let expired_reclaimed = self.store.select_delete(MatchSpec::Expired(now));
        target_removal = target_removal.saturating_sub(expired_reclaimed);

        let mut evicted = 0;
        if target_removal > 0 {
            let mut projection = self.store.project_key_modified(MatchSpec::All);
            // ties on `modified` broken deterministically by key order (§4.E)
            projection.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let victims: Vec<K> = projection
                .into_iter()
                .take(target_removal)
                .map(|(k, _)| k)
                .collect();
            evicted = self.store.delete_many(&victims);
        }

        let outcome = EvictionOutcome {
            expired_reclaimed,
            evicted,
        };
        if outcome.total() > 0 {
            (self.on_evict)(outcome);
            info!(
                expired_reclaimed,
                evicted, "eviction pass reclaimed entries"
            );
        }
        outcome
    }

    /// Start the scheduled loop, if this policy's mode is `Scheduled`.
    /// No-op for `Evented` policies and idempotent if already running.
    pub fn start(self: &Arc<Self>) {
        let EvictionMode::Scheduled(period) = self.mode else {
            return;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let policy = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        policy.enforce();
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop the scheduled loop, if running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            self.shutdown.notify_waiters();
            handle.abort();
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, Value};
    use crate::time::FakeClock;
    use std::sync::atomic::AtomicUsize;

    fn seeded_store(n: i64) -> Arc<EntryStore<String>> {
        let store = Arc::new(EntryStore::new());
        for i in 0..n {
            store.insert(Entry::new(format!("k{i}"), Value::Int(i), None, i));
        }
        store
    }

    #[test]
    fn no_op_under_limit() {
        let store = seeded_store(10);
        let clock = FakeClock::new(100);
        let policy = EvictionPolicy::new(store.clone(), clock, 100, 0.1, EvictionMode::Evented, |_| {});
        let outcome = policy.enforce();
        assert_eq!(outcome.total(), 0);
        assert_eq!(store.size(), 10);
    }

    #[test]
    fn evicts_oldest_by_modified_down_to_reclaim_target() {
        let store = seeded_store(101);
        let clock = FakeClock::new(1000);
        let evicted_count = Arc::new(AtomicUsize::new(0));
        let ec = evicted_count.clone();
        let policy = EvictionPolicy::new(store.clone(), clock, 100, 0.25, EvictionMode::Evented, move |outcome| {
            ec.store(outcome.evicted, Ordering::SeqCst);
        });
        let outcome = policy.enforce();

        // L=100, R=0.25 -> reclaim_to = 100 - round(25) = 75; N=101 -> target=26
        assert_eq!(outcome.evicted, 26);
        assert_eq!(store.size(), 75);
        assert_eq!(evicted_count.load(Ordering::SeqCst), 26);

        // the 26 oldest (k0..k25) must be gone; newer keys remain
        assert!(store.lookup(&"k0".to_string()).is_none());
        assert!(store.lookup(&"k25".to_string()).is_none());
        assert!(store.lookup(&"k26".to_string()).is_some());
        assert!(store.lookup(&"k100".to_string()).is_some());
    }
}
