//! Operations layer (§4.I): the public `Cache<K>` handle wiring every other
//! component together, plus the process-wide named-cache registry (§3).
//!
//! Grounded on the teacher's `tier.rs` `MultiTierCache` for the top-level
//! orchestrator shape (one struct holding the store plus its supporting
//! services, exposing one method per operation) and `enterprise/mod.rs`'s
//! `EnterpriseManager` for the two-phase `new` / `start` lifecycle.

use std::future::Future;
use std::hash::Hash;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::codec::{self, Compression};
use crate::config::{CacheConfig, EvictionModeConfig};
use crate::courier::{Courier, LoaderOutcome};
use crate::entry::{Entry, Value};
use crate::error::{CacheError, CacheResult};
use crate::eviction::{EvictionMode, EvictionOutcome, EvictionPolicy};
use crate::expiration::Janitor;
use crate::hooks::{ActionEvent, Hook, HookPipeline, NotifyResult, Provision, StatsHook, StatsSnapshot};
use crate::locksmith::Locksmith;
use crate::router::{require_single_node, Router};
use crate::store::{EntryStore, FieldPatch, MatchSpec};
use crate::time::{Clock, SystemClock};
use crate::warmer::{Warmer, WarmerRuntime};

/// Per-call write options (§4.I): an omitted expiration falls back to the
/// cache's `default_expiration`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Expiration for this entry; `None` uses the cache default.
    pub expiration: Option<Duration>,
}

/// Whether `size`/iteration operations should count/include expired
/// entries not yet purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessFilter {
    /// Every entry, live or not.
    All,
    /// Only live entries.
    Unexpired,
}

/// Remaining time-to-live, as returned by `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The entry never expires.
    NoExpiry,
    /// Time remaining before expiration.
    Remaining(Duration),
}

/// What `get_and_update`'s function decided to do with the read value.
pub enum UpdateDecision {
    /// Store `Value` and return it.
    Commit(Value),
    /// Leave the entry untouched and return the value that was read.
    Ignore,
}

/// Command kind for `invoke` (§3 `commands`, §4.I `invoke`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// No locking beyond the entry store's own atomicity.
    Read,
    /// Runs under a transaction on the target key.
    Write,
}

/// A registered named command extension.
#[derive(Clone)]
pub struct Command {
    /// Whether this command reads or writes.
    pub kind: CommandKind,
    /// Given the key's current live value (if any), produces the value to
    /// return — and, for `Write` commands, the value to store.
    pub handler: Arc<dyn Fn(Option<Value>) -> CacheResult<Value> + Send + Sync>,
}

struct Services<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    janitor: Arc<Janitor<K>>,
    eviction: Arc<EvictionPolicy<K>>,
    warmers: Arc<WarmerRuntime<K>>,
}

/// The cache handle. One instance per named cache; cheap to clone (it's an
/// `Arc` internally through the registry, but the struct itself holds
/// `Arc`s to each service so a bare `Cache<K>` also composes fine for
/// tests that don't go through the registry).
pub struct Cache<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    config: Arc<CacheConfig>,
    store: Arc<EntryStore<K>>,
    clock: Arc<dyn Clock>,
    locksmith: Arc<Locksmith<K>>,
    hooks: Arc<HookPipeline>,
    stats: Option<Arc<StatsHook>>,
    courier: Arc<Courier<K>>,
    router: Option<Arc<dyn Router<K>>>,
    commands: DashMap<String, Command>,
    services: std::sync::OnceLock<Services<K>>,
    started: AtomicBool,
}

impl<K> Cache<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    /// Construct (but do not start) a cache. Use [`create`] to go through
    /// the named registry, or call [`Cache::start`] directly for a
    /// standalone instance in tests.
    pub fn new(
        config: CacheConfig,
        mut hooks: Vec<Arc<dyn Hook>>,
        router: Option<Arc<dyn Router<K>>>,
    ) -> Arc<Self> {
        let clock = SystemClock::shared();
        let stats = if config.install_stats_hook {
            let stats = StatsHook::new();
            hooks.push(stats.clone() as Arc<dyn Hook>);
            Some(stats)
        } else {
            None
        };

        Arc::new(Self {
            config: Arc::new(config),
            store: Arc::new(EntryStore::new()),
            clock,
            locksmith: Arc::new(Locksmith::new()),
            hooks: Arc::new(HookPipeline::new(hooks)),
            stats,
            courier: Arc::new(Courier::new()),
            router,
            commands: DashMap::new(),
            services: std::sync::OnceLock::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Start background services: janitor, eviction (if scheduled), and
    /// warmers (blocking on required warmers' first pass). Broadcasts
    /// provisions to hooks that requested them. Idempotent.
    pub async fn start(self: &Arc<Self>, warmers: Vec<Arc<dyn Warmer<K>>>) -> CacheResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.hooks
            .broadcast_provisions(&[Provision::Config(self.config.clone())])
            .await;

        let stats = self.stats.clone();
        let hooks_for_janitor = self.hooks.clone();
        let janitor = Arc::new(Janitor::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.janitor_interval(),
            self.config.janitor_sample_size,
            move |removed| {
                if let Some(stats) = &stats {
                    stats.record_expirations(removed);
                }
                if removed > 0 {
                    let hooks = hooks_for_janitor.clone();
                    tokio::spawn(async move {
                        hooks
                            .notify_post(&ActionEvent::new("purge"), NotifyResult::Count(removed))
                            .await;
                    });
                }
            },
        ));
        janitor.start();

        let eviction_mode = match self.config.eviction_mode {
            EvictionModeConfig::Evented => EvictionMode::Evented,
            EvictionModeConfig::Scheduled { period_ms } => {
                EvictionMode::Scheduled(Duration::from_millis(period_ms))
            }
        };
        let stats_for_eviction = self.stats.clone();
        let hooks_for_eviction = self.hooks.clone();
        let eviction = Arc::new(EvictionPolicy::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.size_limit.unwrap_or(usize::MAX),
            self.config.reclaim_fraction,
            eviction_mode,
            move |outcome: EvictionOutcome| {
                if let Some(stats) = &stats_for_eviction {
                    stats.record_evictions(outcome.evicted);
                    stats.record_expirations(outcome.expired_reclaimed);
                }
                // eviction masquerades as `clear` to observers (§9 design note)
                let hooks = hooks_for_eviction.clone();
                let total = outcome.total();
                tokio::spawn(async move {
                    hooks
                        .notify_post(&ActionEvent::new("evict").via("clear"), NotifyResult::Count(total))
                        .await;
                });
            },
        ));
        eviction.start();

        let warmer_runtime = Arc::new(WarmerRuntime::new(warmers));
        let store_for_warm = self.store.clone();
        let hooks_for_warm = self.hooks.clone();
        let clock_for_warm = self.clock.clone();
        warmer_runtime
            .start(move |pairs| {
                let now = clock_for_warm.now_ms();
                for (key, value, expiration) in pairs {
                    store_for_warm.insert(Entry::new(key, value, expiration, now));
                }
                // fire-and-forget: warmer writes observed as a bulk `put_many`
                let hooks = hooks_for_warm.clone();
                tokio::spawn(async move {
                    hooks
                        .notify_post(&ActionEvent::new("put_many"), NotifyResult::Bool(true))
                        .await;
                });
            })
            .await;

        let _ = self.services.set(Services {
            janitor,
            eviction,
            warmers: warmer_runtime,
        });

        Ok(())
    }

    /// Stop every background service.
    pub fn stop(&self) {
        if let Some(services) = self.services.get() {
            services.janitor.stop();
            services.eviction.stop();
            services.warmers.stop();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    fn require_started(&self) -> CacheResult<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::NotStarted(self.config.name.clone()))
        }
    }

    fn resolved_expiration(&self, opts: &PutOptions) -> Option<Duration> {
        opts.expiration.or_else(|| self.config.default_expiration())
    }

    fn maybe_evict_evented(&self) {
        if let Some(services) = self.services.get() {
            if services.eviction.is_evented() {
                services.eviction.enforce();
            }
        }
    }

    /// Register a named command extension for `invoke`.
    pub fn register_command(&self, name: impl Into<String>, command: Command) -> CacheResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::InvalidCommand("command name must not be empty".into()));
        }
        self.commands.insert(name, command);
        Ok(())
    }

    /// `get(k)` (§4.I).
    #[instrument(skip(self))]
    pub async fn get(&self, key: &K) -> CacheResult<Option<Value>> {
        self.require_started()?;
        let pre = ActionEvent::new("get");
        self.hooks.notify_pre(&pre).await;

        let now = self.clock.now_ms();
        let looked = self.store.lookup(key);
        let mut purged = false;
        let entry = Janitor::lazy_check(&self.store, key, looked, now, self.config.lazy_expiration, || {
            purged = true;
        });

        if purged {
            self.hooks
                .notify_post(&ActionEvent::new("purge"), NotifyResult::Count(1))
                .await;
        }

        let value = entry.filter(|e| e.is_live_at(now)).map(|e| e.value);
        self.hooks.notify_post(&pre, NotifyResult::Value(value.clone())).await;
        Ok(value)
    }

    /// `put(k, v, opts)` (§4.I).
    pub async fn put(&self, key: K, value: Value, opts: PutOptions) -> CacheResult<bool> {
        self.require_started()?;
        let expiration = self.resolved_expiration(&opts);
        let pre = ActionEvent::new("put");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let k = key.clone();
        self.locksmith
            .with_write_lock([key], self.config.transactional, || async move {
                let now = clock.now_ms();
                store.insert(Entry::new(k, value, expiration, now));
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(true)).await;
        self.maybe_evict_evented();
        Ok(true)
    }

    /// `put_many(pairs, opts)` (§4.I): atomic failure if any pair is
    /// malformed means we validate every pair before writing any of them.
    /// A batch with the same key twice is ambiguous about which write wins
    /// and is rejected outright rather than silently picking one.
    pub async fn put_many(&self, pairs: Vec<(K, Value, PutOptions)>) -> CacheResult<bool> {
        self.require_started()?;
        let mut seen = std::collections::HashSet::with_capacity(pairs.len());
        if pairs.iter().any(|(k, _, _)| !seen.insert(k.clone())) {
            return Err(CacheError::InvalidPairs("duplicate key in put_many batch".into()));
        }

        let pre = ActionEvent::new("put_many");
        self.hooks.notify_pre(&pre).await;

        let keys: Vec<K> = pairs.iter().map(|(k, _, _)| k.clone()).collect();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        self.locksmith
            .with_write_lock(keys, true, || async move {
                let now = clock.now_ms();
                for (key, value, opts) in pairs {
                    let expiration = opts.expiration.or_else(|| config.default_expiration());
                    store.insert(Entry::new(key, value, expiration, now));
                }
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(true)).await;
        self.maybe_evict_evented();
        Ok(true)
    }

    /// `update(k, v)` (§4.I): replaces only `value`; `modified` and
    /// `expiration` are unchanged.
    pub async fn update(&self, key: &K, value: Value) -> CacheResult<bool> {
        self.require_started()?;
        let pre = ActionEvent::new("update");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let k = key.clone();
        let existed = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                store.modify_fields(&k, &[FieldPatch::Value(value)])
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(existed)).await;
        Ok(existed)
    }

    /// `delete(k)` (§4.I).
    pub async fn delete(&self, key: &K) -> CacheResult<bool> {
        self.require_started()?;
        let pre = ActionEvent::new("delete");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let k = key.clone();
        let removed = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                store.delete(&k)
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(removed)).await;
        Ok(removed)
    }

    /// `take(k)` (§4.I): atomic remove + return last live value.
    pub async fn take(&self, key: &K) -> CacheResult<Option<Value>> {
        self.require_started()?;
        let pre = ActionEvent::new("take");
        self.hooks.notify_pre(&pre).await;

        let now = self.clock.now_ms();
        let store = self.store.clone();
        let k = key.clone();
        let taken = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                store.take(&k)
            })
            .await;

        let mut purged = false;
        let value = taken
            .filter(|e| {
                if e.is_live_at(now) {
                    true
                } else {
                    purged = true;
                    false
                }
            })
            .map(|e| e.value);

        if purged {
            self.hooks
                .notify_post(&ActionEvent::new("purge"), NotifyResult::Count(1))
                .await;
        }
        self.hooks.notify_post(&pre, NotifyResult::Value(value.clone())).await;
        Ok(value)
    }

    /// `clear()` (§4.I): runs as a transaction on the empty key set.
    pub async fn clear(&self) -> CacheResult<usize> {
        self.require_started()?;
        let pre = ActionEvent::new("clear");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let removed = self
            .locksmith
            .with_transaction(Vec::<K>::new(), || async move { store.clear() })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Count(removed)).await;
        Ok(removed)
    }

    /// `size(opts)` (§4.I).
    pub async fn size(&self, filter: LivenessFilter) -> CacheResult<usize> {
        self.require_started()?;
        Ok(match filter {
            LivenessFilter::All => self.store.size(),
            LivenessFilter::Unexpired => {
                let now = self.clock.now_ms();
                self.store.select_count(MatchSpec::Unexpired(now))
            }
        })
    }

    /// `exists(k)` (§4.I): live entries only.
    pub async fn exists(&self, key: &K) -> CacheResult<bool> {
        self.require_started()?;
        let now = self.clock.now_ms();
        Ok(self.store.lookup(key).map(|e| e.is_live_at(now)).unwrap_or(false))
    }

    /// `expire(k, ms)` (§4.I): `ms > -1` sets `expiration=ms, modified=now`;
    /// otherwise deletes the key.
    pub async fn expire(&self, key: &K, ms: i64) -> CacheResult<bool> {
        self.require_started()?;
        let pre = ActionEvent::new("expire");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let k = key.clone();
        let result = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                if ms > -1 {
                    let now = clock.now_ms();
                    store.modify_fields(
                        &k,
                        &[
                            FieldPatch::Expiration(Some(Duration::from_millis(ms as u64))),
                            FieldPatch::Modified(now),
                        ],
                    )
                } else {
                    store.delete(&k)
                }
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(result)).await;
        Ok(result)
    }

    /// `refresh(k)` (§4.I): resets the deadline to `now + expiration`.
    pub async fn refresh(&self, key: &K) -> CacheResult<bool> {
        self.require_started()?;
        let pre = ActionEvent::new("refresh");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let k = key.clone();
        let result = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                let now = clock.now_ms();
                store.modify_fields(&k, &[FieldPatch::Modified(now)])
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(result)).await;
        Ok(result)
    }

    /// `touch(k)` (§4.I): sets `modified=now` while preserving the
    /// original absolute deadline (§9 disambiguation).
    pub async fn touch(&self, key: &K) -> CacheResult<bool> {
        self.require_started()?;
        let pre = ActionEvent::new("touch");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let k = key.clone();
        let result = self
            .locksmith
            .with_transaction([key.clone()], || async move {
                let Some(entry) = store.lookup(&k) else {
                    return false;
                };
                let now = clock.now_ms();
                let new_expiration = entry.deadline().map(|deadline| {
                    Duration::from_millis(deadline.saturating_sub(now).max(0) as u64)
                });
                store.modify_fields(
                    &k,
                    &[
                        FieldPatch::Modified(now),
                        FieldPatch::Expiration(new_expiration),
                    ],
                )
            })
            .await;

        self.hooks.notify_post(&pre, NotifyResult::Bool(result)).await;
        Ok(result)
    }

    /// `ttl(k)` (§4.I).
    pub async fn ttl(&self, key: &K) -> CacheResult<Option<Ttl>> {
        self.require_started()?;
        let now = self.clock.now_ms();
        Ok(self.store.lookup(key).and_then(|e| {
            if !e.is_live_at(now) {
                return None;
            }
            Some(match e.ttl_at(now) {
                None => Ttl::NoExpiry,
                Some(remaining) => Ttl::Remaining(remaining),
            })
        }))
    }

    /// `increment(k, delta, initial)` (§4.I).
    pub async fn increment(&self, key: &K, delta: i64, initial: i64) -> CacheResult<i64> {
        self.require_started()?;
        let pre = ActionEvent::new("increment");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        let k = key.clone();
        let result = self
            .locksmith
            .with_write_lock([key.clone()], self.config.transactional, || async move {
                let now = clock.now_ms();
                let default_expiration = config.default_expiration();
                let k_for_default = k.clone();
                store.counter_update(&k, delta, move || {
                    Entry::new(k_for_default, Value::Int(initial), default_expiration, now)
                })
            })
            .await;

        match result {
            Ok(new_value) => {
                self.hooks
                    .notify_post(&pre, NotifyResult::Value(Some(Value::Int(new_value))))
                    .await;
                Ok(new_value)
            }
            Err(()) => {
                self.hooks
                    .notify_post(&pre, NotifyResult::Error("non_numeric_value".into()))
                    .await;
                Err(CacheError::NonNumericValue)
            }
        }
    }

    /// `fetch(k, loader)` (§4.I, §4.G): single-flight read-through.
    pub async fn fetch<F, Fut>(&self, key: &K, loader: F) -> CacheResult<Value>
    where
        F: FnOnce(K) -> Fut + Send,
        Fut: Future<Output = Result<LoaderOutcome, String>> + Send,
    {
        self.require_started()?;

        let now = self.clock.now_ms();
        if let Some(entry) = self.store.lookup(key) {
            if entry.is_live_at(now) {
                return Ok(entry.value);
            }
        }

        let outcome = self.courier.load(key, loader).await;

        let (value, notify_result) = match outcome {
            Ok(LoaderOutcome::Commit(value)) => {
                let expiration = self.config.default_expiration();
                self.store
                    .insert(Entry::new(key.clone(), value.clone(), expiration, now));
                (Ok(value.clone()), NotifyResult::Value(Some(value)))
            }
            Ok(LoaderOutcome::CommitWithExpiration(value, expiration)) => {
                self.store
                    .insert(Entry::new(key.clone(), value.clone(), expiration, now));
                (Ok(value.clone()), NotifyResult::Value(Some(value)))
            }
            Ok(LoaderOutcome::Ignore(value)) => {
                (Ok(value.clone()), NotifyResult::Value(Some(value)))
            }
            Err(reason) => (
                Err(CacheError::Callback(reason.clone())),
                NotifyResult::Error(reason),
            ),
        };

        // §9 open question resolved: fetch always notifies post-hooks,
        // regardless of commit/ignore/error.
        self.hooks
            .notify_post(&ActionEvent::new("fetch"), notify_result)
            .await;

        value
    }

    /// `get_and_update(k, f)` (§4.I): runs under a transaction on `{k}`.
    pub async fn get_and_update(
        &self,
        key: &K,
        f: impl FnOnce(Option<Value>) -> UpdateDecision + Send,
    ) -> CacheResult<Option<Value>> {
        self.require_started()?;
        let pre = ActionEvent::new("get_and_update");
        self.hooks.notify_pre(&pre).await;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let k = key.clone();
        let result = self
            .locksmith
            .with_transaction([key.clone()], || async move {
                let now = clock.now_ms();
                let current = store.lookup(&k).filter(|e| e.is_live_at(now)).map(|e| e.value);
                match f(current.clone()) {
                    UpdateDecision::Commit(new_value) => {
                        store.modify_fields(&k, &[FieldPatch::Value(new_value.clone()), FieldPatch::Modified(now)]);
                        Some(new_value)
                    }
                    UpdateDecision::Ignore => current,
                }
            })
            .await;

        self.hooks
            .notify_post(&pre, NotifyResult::Value(result.clone()))
            .await;
        Ok(result)
    }

    /// `transaction(keys, f)` (§4.I): user body runs with `keys` exclusive.
    pub async fn transaction<F, Fut, R>(&self, keys: impl IntoIterator<Item = K>, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.locksmith.with_transaction(keys, f).await
    }

    /// `invoke(cmd, k)` (§4.I).
    pub async fn invoke(&self, cmd: &str, key: &K) -> CacheResult<Value> {
        self.require_started()?;
        let command = self
            .commands
            .get(cmd)
            .map(|c| c.value().clone())
            .ok_or_else(|| CacheError::InvalidCommand(cmd.to_string()))?;

        match command.kind {
            CommandKind::Read => {
                let now = self.clock.now_ms();
                let current = self.store.lookup(key).filter(|e| e.is_live_at(now)).map(|e| e.value);
                (command.handler)(current)
            }
            CommandKind::Write => {
                let store = self.store.clone();
                let clock = self.clock.clone();
                let k = key.clone();
                let handler = command.handler.clone();
                self.locksmith
                    .with_transaction([key.clone()], || async move {
                        let now = clock.now_ms();
                        let current = store.lookup(&k).filter(|e| e.is_live_at(now)).map(|e| e.value);
                        let result = handler(current)?;
                        store.modify_fields(&k, &[FieldPatch::Value(result.clone()), FieldPatch::Modified(now)]);
                        Ok(result)
                    })
                    .await
            }
        }
    }

    /// `purge()` (§4.I): force an immediate janitor sweep, bypassing its
    /// timer. The sweep's own `on_sweep` callback delivers the `{purge,
    /// removed_count}` hook event, so this does not notify twice.
    pub async fn purge(&self) -> CacheResult<usize> {
        self.require_started()?;
        let services = self.services.get().ok_or(CacheError::JanitorDisabled)?;
        let summary = services.janitor.sweep_once();
        Ok(summary.removed)
    }

    /// `prune(n, opts)` (§4.I): size-bound trim reusing §4.E's algorithm —
    /// expired entries are reclaimed first, and only live entries make up
    /// the remainder, so a live key is never evicted while an
    /// already-expired one is left behind.
    pub async fn prune(&self, target_size: usize) -> CacheResult<usize> {
        self.require_started()?;
        let n = self.store.size();
        if n <= target_size {
            return Ok(0);
        }
        let mut target_removal = n - target_size;

        let now = self.clock.now_ms();
        let expired_reclaimed = self.store.select_delete(MatchSpec::Expired(now));
        target_removal = target_removal.saturating_sub(expired_reclaimed);

        let mut evicted = 0;
        if target_removal > 0 {
            let mut projection = self.store.project_key_modified(MatchSpec::All);
            projection.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let victims: Vec<K> = projection.into_iter().take(target_removal).map(|(k, _)| k).collect();
            evicted = self.store.delete_many(&victims);
        }

        let removed = expired_reclaimed + evicted;
        self.hooks
            .notify_post(&ActionEvent::new("prune"), NotifyResult::Count(removed))
            .await;
        Ok(removed)
    }

    /// `stream(match)` / `keys()` / `values()` / `entries()` (§4.I): all
    /// backed by the same compiled-predicate iteration.
    pub async fn stream(&self, filter: LivenessFilter) -> CacheResult<Vec<Entry<K>>> {
        self.require_started()?;
        let spec = match filter {
            LivenessFilter::All => MatchSpec::All,
            LivenessFilter::Unexpired => MatchSpec::Unexpired(self.clock.now_ms()),
        };
        Ok(self.store.iterate(spec))
    }

    /// `keys()` (§4.I): the key half of `stream`'s entries.
    pub async fn keys(&self, filter: LivenessFilter) -> CacheResult<Vec<K>> {
        Ok(self.stream(filter).await?.into_iter().map(|e| e.key).collect())
    }

    /// `values()` (§4.I): the value half of `stream`'s entries.
    pub async fn values(&self, filter: LivenessFilter) -> CacheResult<Vec<Value>> {
        Ok(self.stream(filter).await?.into_iter().map(|e| e.value).collect())
    }

    /// `entries()` (§4.I): `(key, value)` pairs, dropping the bookkeeping
    /// fields `stream` exposes.
    pub async fn entries(&self, filter: LivenessFilter) -> CacheResult<Vec<(K, Value)>> {
        Ok(self.stream(filter).await?.into_iter().map(|e| (e.key, e.value)).collect())
    }

    /// Statistics snapshot, if a stats hook is installed (§6).
    pub fn stats(&self) -> CacheResult<StatsSnapshot> {
        self.stats.as_ref().map(|s| s.snapshot()).ok_or(CacheError::StatsDisabled)
    }

    /// Last janitor sweep summary, if the janitor has run (`inspect(janitor,
    /// last_run)`).
    pub fn last_janitor_summary(&self) -> CacheResult<Option<crate::expiration::JanitorSummary>> {
        Ok(self.services.get().and_then(|s| s.janitor.last_summary()))
    }
}

impl<K> Cache<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// `dump(path)` / `save(path, opts)` (§4.J).
    pub async fn save(&self, path: &Path, compression: Compression) -> CacheResult<usize> {
        self.require_started()?;
        let entries = self.store.iterate(MatchSpec::All);
        codec::save(path, compression, entries)
    }

    /// `load(path)` / `restore(path, opts)` (§4.J): merges entries, one
    /// `put` per live entry (already TTL-adjusted by the codec).
    pub async fn restore(&self, path: &Path) -> CacheResult<usize> {
        self.require_started()?;
        let now = self.clock.now_ms();
        let store = self.store.clone();
        let count = codec::restore::<K>(path, now, move |entry| {
            store.insert(entry);
        })?;
        self.hooks
            .notify_post(&ActionEvent::new("restore"), NotifyResult::Count(count))
            .await;
        Ok(count)
    }

    /// `import(pairs)` (§4.I / §4.J): per entry, skip if already dead,
    /// otherwise insert with the TTL-preserving adjustment.
    pub async fn import(&self, entries: Vec<Entry<K>>) -> CacheResult<bool> {
        self.require_started()?;
        let now = self.clock.now_ms();
        for entry in entries {
            match entry.expiration {
                None => self.store.insert(entry),
                Some(_) => {
                    if entry.is_live_at(now) {
                        self.store.insert(entry);
                    }
                }
            }
        }
        Ok(true)
    }
}

impl<K> Cache<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    /// Resolve a keyed multi-operation against the router, if one is
    /// installed, failing `cross_slot` if the keys span more than one node
    /// (§4.K).
    pub fn check_routing(&self, keys: &[K]) -> CacheResult<()> {
        match &self.router {
            Some(router) => require_single_node(router.as_ref(), keys),
            None => Ok(()),
        }
    }
}

/// Process-wide named-cache registry (§3): two callers asking for the same
/// name observe the same underlying cache.
static REGISTRY: Lazy<DashMap<String, Arc<dyn std::any::Any + Send + Sync>>> =
    Lazy::new(DashMap::new);

/// Create and start a new named cache, registering it process-wide.
/// Fails with `invalid_name` if a cache with this name already exists and
/// `allow_existing` is false.
pub async fn create<K>(
    config: CacheConfig,
    hooks: Vec<Arc<dyn Hook>>,
    warmers: Vec<Arc<dyn Warmer<K>>>,
    router: Option<Arc<dyn Router<K>>>,
    allow_existing: bool,
) -> CacheResult<Arc<Cache<K>>>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    if !allow_existing && REGISTRY.contains_key(&config.name) {
        return Err(CacheError::InvalidName(format!(
            "cache '{}' already exists",
            config.name
        )));
    }

    let name = config.name.clone();
    let cache = Cache::new(config, hooks, router);
    cache.start(warmers).await?;
    REGISTRY.insert(name, cache.clone() as Arc<dyn std::any::Any + Send + Sync>);
    Ok(cache)
}

/// Look up a previously created cache by name.
pub fn lookup<K>(name: &str) -> CacheResult<Arc<Cache<K>>>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    let entry = REGISTRY.get(name).ok_or_else(|| CacheError::NoCache(name.to_string()))?;
    entry
        .value()
        .clone()
        .downcast::<Cache<K>>()
        .map_err(|_| CacheError::NoCache(name.to_string()))
}

/// Remove a cache from the registry and stop its services. Used by tests
/// and by graceful shutdown.
pub fn remove(name: &str) {
    if let Some((_, any)) = REGISTRY.remove(name) {
        drop(any);
    }
}
