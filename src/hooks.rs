//! Hook / observer pipeline (§4.F).
//!
//! Grounded on the teacher's `invalidation.rs` (`TagInvalidator`,
//! `PubSubInvalidator`) for the broadcast-fanout shape, generalized from
//! cache-invalidation events to the full `{action, result}` surface. Unlike
//! that file, hooks here own their state through ordinary interior
//! mutability (`Arc<dyn Hook>` plus atomics/locks inside each
//! implementation) rather than threading an explicit `state -> new_state`
//! value through every call — a better fit for Rust ownership than the
//! functional-actor style the original design notes describe.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::CacheConfig;
use crate::entry::Value;

/// Where in the operation's lifecycle a hook is notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// Receives `(action, None)` before the operation executes.
    Pre,
    /// Receives `(action, Some(result))` after the operation executes.
    Post,
    /// A long-running observer with its own supervised lifecycle (e.g. the
    /// built-in [`StatsHook`]); dispatched the same as `Post`.
    Service,
}

/// Which actions a hook subscribes to.
#[derive(Debug, Clone)]
pub enum Subscription {
    /// Every action.
    All,
    /// Exactly these action names.
    Named(HashSet<String>),
}

impl Subscription {
    fn matches(&self, action: &str) -> bool {
        match self {
            Subscription::All => true,
            Subscription::Named(set) => set.contains(action),
        }
    }
}

/// Outcome passed to post-hooks. Values stay opaque to the pipeline itself;
/// this just distinguishes the operation-surface return shapes (§6).
#[derive(Debug, Clone)]
pub enum NotifyResult {
    /// `{ok, value}` / `{missing, none}` for value-returning reads.
    Value(Option<Value>),
    /// A removed/updated/matched count.
    Count(usize),
    /// A boolean-return operation (`update`, `expire`, `refresh`, `touch`).
    Bool(bool),
    /// The operation failed; hooks still observe failures of non-write ops.
    Error(String),
}

/// A late-bound handle pushed to a hook after the cache finishes starting
/// (§4.F "provisions", §9 "two-phase startup").
#[derive(Clone)]
pub enum Provision {
    /// The cache's resolved, immutable configuration.
    Config(Arc<CacheConfig>),
}

/// An action notification, with the overrides §4.F allows a caller to
/// attach.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    /// The canonical operation name (`"put"`, `"delete"`, `"clear"`, ...).
    pub action: String,
    /// Overrides the notified name (e.g. an eviction masquerading as
    /// `"clear"`) without changing what actually happened.
    pub via: Option<String>,
    /// Suppresses both pre and post delivery for this occurrence.
    pub notify: bool,
}

impl ActionEvent {
    /// Construct a plain, notifying event for `action`.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            via: None,
            notify: true,
        }
    }

    /// Attach a `via` override.
    pub fn via(mut self, via: impl Into<String>) -> Self {
        self.via = Some(via.into());
        self
    }

    /// Suppress delivery for this occurrence.
    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }

    fn notified_name(&self) -> &str {
        self.via.as_deref().unwrap_or(&self.action)
    }
}

/// A hook implementation. `handle_notify` is called for both pre and post
/// delivery; hooks distinguish the phase by whether `result` is `None`.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Unique name within the cache.
    fn name(&self) -> &str;
    /// Whether this is a pre, post, or service hook.
    fn hook_type(&self) -> HookType;
    /// The action subscription.
    fn subscription(&self) -> &Subscription;
    /// Whether delivery blocks the caller (up to `timeout`).
    fn sync(&self) -> bool {
        false
    }
    /// For sync delivery, the cap after which delivery is considered
    /// complete regardless of whether the hook replied.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Provisions this hook wants pushed to it after startup.
    fn wants_provisions(&self) -> &[&'static str] {
        &[]
    }

    /// Deliver one notification. `result` is `None` for pre-hooks.
    async fn handle_notify(&self, action: &str, result: Option<&NotifyResult>);

    /// Deliver a provision requested via [`Hook::wants_provisions`].
    async fn handle_provision(&self, _provision: &Provision) {}
}

/// Dispatches `{action, result}` events to registered hooks.
pub struct HookPipeline {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookPipeline {
    /// Construct a pipeline from a fixed hook set. The hook registry is
    /// read-only once the cache starts (§5 "Shared resources").
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self { hooks }
    }

    /// Broadcast every requested provision to every hook that asked for it.
    /// Called once, after the owning cache finishes constructing itself.
    pub async fn broadcast_provisions(&self, provisions: &[Provision]) {
        for hook in &self.hooks {
            for wanted in hook.wants_provisions() {
                if let Some(p) = provisions.iter().find(|p| provision_name(p) == *wanted) {
                    hook.handle_provision(p).await;
                }
            }
        }
    }

    /// Deliver a pre-notification: `(action, None)` before the operation
    /// executes.
    pub async fn notify_pre(&self, event: &ActionEvent) {
        if !event.notify {
            return;
        }
        self.dispatch(HookType::Pre, event, None).await;
    }

    /// Deliver a post-notification: `(action, Some(result))` after the
    /// operation executes.
    pub async fn notify_post(&self, event: &ActionEvent, result: NotifyResult) {
        if !event.notify {
            return;
        }
        self.dispatch(HookType::Post, event, Some(&result)).await;
    }

    async fn dispatch(&self, phase: HookType, event: &ActionEvent, result: Option<&NotifyResult>) {
        let name = event.notified_name();
        for hook in &self.hooks {
            let matches_phase = match (phase, hook.hook_type()) {
                (HookType::Pre, HookType::Pre) => true,
                (HookType::Post, HookType::Post) | (HookType::Post, HookType::Service) => true,
                _ => false,
            };
            if !matches_phase || !hook.subscription().matches(name) {
                continue;
            }

            if hook.sync() {
                self.deliver_sync(hook.clone(), name, result).await;
            } else {
                self.deliver_async(hook.clone(), name, result.cloned());
            }
        }
    }

    async fn deliver_sync(&self, hook: Arc<dyn Hook>, action: &str, result: Option<&NotifyResult>) {
        let action = action.to_string();
        let result = result.cloned();
        let fut = async move { hook.handle_notify(&action, result.as_ref()).await };
        match hook.timeout() {
            Some(cap) => {
                if tokio::time::timeout(cap, fut).await.is_err() {
                    warn!(hook = hook_name(&hook), "sync hook delivery timed out");
                }
            }
            None => fut.await,
        }
    }

    /// Fire-and-forget delivery on its own task: a panicking hook only
    /// aborts that task (tokio isolates it), never the caller awaiting
    /// `notify_post`/`notify_pre`, satisfying §4.F's error-isolation
    /// requirement without manual unwind handling.
    fn deliver_async(&self, hook: Arc<dyn Hook>, action: &str, result: Option<NotifyResult>) {
        let action = action.to_string();
        tokio::spawn(async move {
            let name = hook.name().to_string();
            let handle =
                tokio::spawn(async move { hook.handle_notify(&action, result.as_ref()).await });
            if handle.await.is_err() {
                error!(hook = %name, "hook panicked during async delivery; isolated");
            }
        });
    }
}

fn hook_name(hook: &Arc<dyn Hook>) -> &str {
    hook.name()
}

fn provision_name(p: &Provision) -> &'static str {
    match p {
        Provision::Config(_) => "config",
    }
}

/// Built-in statistics service hook (§6 "Statistics payload"), generalizing
/// `tier.rs`'s `get_stats`/`hit_rate` from tier promotions to the full
/// operation surface.
pub struct StatsHook {
    subscription: Subscription,
    operations: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatsHook {
    /// Construct a stats hook subscribed to every action.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscription: Subscription::All,
            operations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    /// Snapshot of the counters, per §6's statistics payload.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_reads = hits + misses;
        StatsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if total_reads == 0 {
                0.0
            } else {
                hits as f64 / total_reads as f64
            },
            miss_rate: if total_reads == 0 {
                0.0
            } else {
                misses as f64 / total_reads as f64
            },
        }
    }

    /// Record an eviction/expiration removal count outside the normal
    /// notify path (janitor and eviction policy call this directly so they
    /// don't need a synthetic `ActionEvent` per removed key).
    pub fn record_evictions(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record expirations removed by the janitor.
    pub fn record_expirations(&self, n: usize) {
        self.expirations.fetch_add(n as u64, Ordering::Relaxed);
    }
}

impl Default for StatsHook {
    fn default() -> Self {
        Self {
            subscription: Subscription::All,
            operations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }
}

/// A point-in-time read of [`StatsHook`]'s counters.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    /// Total operations observed.
    pub operations: u64,
    /// Reads that found a live value.
    pub hits: u64,
    /// Reads that found nothing (missing or expired).
    pub misses: u64,
    /// Writes (`put`/`put_many`).
    pub writes: u64,
    /// In-place updates (`update`/`increment`/`refresh`/`touch`).
    pub updates: u64,
    /// Entries removed by the eviction policy.
    pub evictions: u64,
    /// Entries removed by expiration (lazy or janitor).
    pub expirations: u64,
    /// `hits / (hits + misses)`, or `0.0` with no reads yet.
    pub hit_rate: f64,
    /// `misses / (hits + misses)`, or `0.0` with no reads yet.
    pub miss_rate: f64,
}

#[async_trait]
impl Hook for StatsHook {
    fn name(&self) -> &str {
        "stats"
    }

    fn hook_type(&self) -> HookType {
        HookType::Service
    }

    fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    async fn handle_notify(&self, action: &str, result: Option<&NotifyResult>) {
        let Some(result) = result else { return };
        self.operations.fetch_add(1, Ordering::Relaxed);

        match action {
            "get" | "exists" | "fetch" | "ttl" => match result {
                NotifyResult::Value(Some(_)) | NotifyResult::Bool(true) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                NotifyResult::Value(None) | NotifyResult::Bool(false) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            },
            "put" | "put_many" => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            "update" | "increment" | "refresh" | "touch" | "expire" => {
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
            "purge" => {
                if let NotifyResult::Count(n) = result {
                    self.expirations.fetch_add(*n as u64, Ordering::Relaxed);
                }
            }
            _ => {}
        }
    }
}
