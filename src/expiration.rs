//! Expiration engine: lazy purge-on-read plus the periodic Janitor sweep
//! (§4.D).
//!
//! Grounded on the teacher's `tier.rs::clean_expired`/`maintenance` (a
//! scheduled full-table scan over `DashMap`) and, for the sampling
//! supplement, `other_examples/whitfin-retainer`'s `monitor(sample,
//! threshold, frequency)`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::store::{EntryStore, MatchSpec};
use crate::time::Clock;

use std::hash::Hash;

/// Summary of the janitor's most recent sweep, available through
/// `inspect(janitor, last_run)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JanitorSummary {
    /// When the sweep started, in clock milliseconds.
    pub started_at_ms: i64,
    /// How long the sweep took, in milliseconds.
    pub duration_ms: i64,
    /// Entries removed by this sweep.
    pub removed: usize,
}

/// Shared janitor state, read by `inspect` and written by the sweep loop.
#[derive(Debug, Default)]
struct JanitorState {
    started_at_ms: AtomicI64,
    duration_ms: AtomicI64,
    removed: AtomicUsize,
    ran_at_least_once: AtomicBool,
}

/// Periodic sweep that deletes all expired entries on a schedule, plus the
/// lazy-purge helper used by every read primitive.
pub struct Janitor<K>
where
    K: Eq + Hash + Clone + Send + Sync + Ord + 'static,
{
    store: Arc<EntryStore<K>>,
    clock: Arc<dyn Clock>,
    interval: Option<Duration>,
    sample_size: Option<usize>,
    sample_threshold: f64,
    state: Arc<JanitorState>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    /// Invoked once per sweep with the removed count, so `{purge,
    /// removed_count}` reaches observers (§4.D item 3).
    on_sweep: Box<dyn Fn(usize) + Send + Sync>,
}

impl<K> Janitor<K>
where
    K: Eq + Hash + Clone + Send + Sync + Ord + 'static,
{
    /// Construct a janitor. `interval = None` disables periodic sweeps
    /// entirely (manual `purge()` still works). `sample_size` enables the
    /// sampled-purge escape hatch (SPEC_FULL supplement); `None` is a plain
    /// full-table sweep.
    pub fn new(
        store: Arc<EntryStore<K>>,
        clock: Arc<dyn Clock>,
        interval: Option<Duration>,
        sample_size: Option<usize>,
        on_sweep: impl Fn(usize) + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock,
            interval,
            sample_size,
            sample_threshold: 0.1,
            state: Arc::new(JanitorState::default()),
            handle: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            on_sweep: Box::new(on_sweep),
        }
    }

    /// Lazy expiry wrapper (§3, §4.D "Lazy path"): given a looked-up entry,
    /// decide whether it's live, purging it if not and `lazy_expiration` is
    /// enabled. Returns `Some(entry)` only if the entry should be treated as
    /// present to the caller.
    pub fn lazy_check(
        store: &EntryStore<K>,
        key: &K,
        entry: Option<crate::entry::Entry<K>>,
        now_ms: i64,
        lazy_expiration: bool,
        on_purge: impl FnOnce(),
    ) -> Option<crate::entry::Entry<K>> {
        let entry = entry?;
        if entry.is_live_at(now_ms) {
            return Some(entry);
        }
        if lazy_expiration {
            store.delete(key);
            on_purge();
            None
        } else {
            Some(entry)
        }
    }

    /// Run one sweep synchronously, recording a summary and invoking
    /// `on_sweep`. Used by both the periodic loop and manual `purge()`.
    #[instrument(skip(self))]
    pub fn sweep_once(&self) -> JanitorSummary {
        let started = self.clock.now_ms();

        let removed = match self.sample_size {
            None => self.store.select_delete(MatchSpec::Expired(started)),
            Some(n) => self.sampled_sweep(n, started),
        };

        let duration = self.clock.now_ms() - started;
        self.state.started_at_ms.store(started, Ordering::SeqCst);
        self.state.duration_ms.store(duration, Ordering::SeqCst);
        self.state.removed.store(removed, Ordering::SeqCst);
        self.state.ran_at_least_once.store(true, Ordering::SeqCst);

        (self.on_sweep)(removed);
        debug!(removed, duration_ms = duration, "janitor sweep complete");

        JanitorSummary {
            started_at_ms: started,
            duration_ms: duration,
            removed,
        }
    }

    /// Sampled sweep (SUPPLEMENT): inspect a random subset of keys per tick;
    /// if the observed expired fraction exceeds `sample_threshold`, repeat
    /// against a fresh sample until it no longer does, bounding a single
    /// call's cost on very large tables instead of scanning everything.
    fn sampled_sweep(&self, sample_size: usize, now_ms: i64) -> usize {
        let mut total_removed = 0;
        loop {
            let all: Vec<K> = self
                .store
                .project_key_modified(MatchSpec::All)
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            if all.is_empty() {
                break;
            }

            let mut rng = rand::thread_rng();
            let sample: Vec<K> = all
                .choose_multiple(&mut rng, sample_size.min(all.len()))
                .cloned()
                .collect();

            let sample_len = sample.len();
            let expired_in_sample: Vec<K> = sample
                .into_iter()
                .filter(|k| {
                    self.store
                        .lookup(k)
                        .map(|e| !e.is_live_at(now_ms))
                        .unwrap_or(false)
                })
                .collect();

            let removed_this_round = self.store.delete_many(&expired_in_sample);
            total_removed += removed_this_round;

            let fraction = expired_in_sample.len() as f64 / sample_len.max(1) as f64;
            if fraction <= self.sample_threshold {
                break;
            }
        }
        total_removed
    }

    /// The last recorded sweep summary, or `None` if the janitor has never
    /// run (`inspect(janitor, last_run)`).
    pub fn last_summary(&self) -> Option<JanitorSummary> {
        if !self.state.ran_at_least_once.load(Ordering::SeqCst) {
            return None;
        }
        Some(JanitorSummary {
            started_at_ms: self.state.started_at_ms.load(Ordering::SeqCst),
            duration_ms: self.state.duration_ms.load(Ordering::SeqCst),
            removed: self.state.removed.load(Ordering::SeqCst),
        })
    }

    /// Start the periodic sweep loop, if `interval` is set. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Some(period) = self.interval else {
            return;
        };
        if self.handle.lock().unwrap().is_some() {
            return;
        }

        let janitor = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        janitor.sweep_once();
                    }
                    _ = shutdown.notified() => {
                        info!("janitor shutting down");
                        break;
                    }
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop the periodic sweep loop, if running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            self.shutdown.notify_waiters();
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, Value};
    use crate::time::FakeClock;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn lazy_check_purges_expired_and_reports() {
        let store: EntryStore<String> = EntryStore::new();
        store.insert(Entry::new(
            "a".to_string(),
            Value::Int(1),
            Some(Duration::from_millis(1)),
            0,
        ));
        let purged = Arc::new(StdAtomicUsize::new(0));
        let p = purged.clone();
        let looked = store.lookup(&"a".to_string());
        let result = Janitor::lazy_check(&store, &"a".to_string(), looked, 1000, true, || {
            p.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.is_none());
        assert_eq!(purged.load(Ordering::SeqCst), 1);
        assert!(store.lookup(&"a".to_string()).is_none());
    }

    #[test]
    fn lazy_check_keeps_entry_when_lazy_expiration_disabled() {
        let store: EntryStore<String> = EntryStore::new();
        store.insert(Entry::new(
            "a".to_string(),
            Value::Int(1),
            Some(Duration::from_millis(1)),
            0,
        ));
        let looked = store.lookup(&"a".to_string());
        let result = Janitor::lazy_check(&store, &"a".to_string(), looked, 1000, false, || {
            panic!("must not purge");
        });
        assert!(result.is_some());
        assert!(store.lookup(&"a".to_string()).is_some());
    }

    #[tokio::test]
    async fn sweep_once_removes_all_expired_full_scan() {
        let store: Arc<EntryStore<String>> = Arc::new(EntryStore::new());
        store.insert(Entry::new("a".to_string(), Value::Int(1), Some(Duration::from_millis(1)), 0));
        store.insert(Entry::new("b".to_string(), Value::Int(2), None, 0));
        let clock = FakeClock::new(1000);
        let reported = Arc::new(StdAtomicUsize::new(0));
        let r = reported.clone();
        let janitor = Janitor::new(store.clone(), clock, None, None, move |n| {
            r.store(n, Ordering::SeqCst);
        });
        let summary = janitor.sweep_once();
        assert_eq!(summary.removed, 1);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert_eq!(store.size(), 1);
    }
}
