//! Concurrency coordinator: per-key writer locks layered beneath whole-table
//! transactions (§4.C).
//!
//! Grounded on the teacher's `src/cache/lock.rs` (`DistributedMutex`,
//! `DistributedRwLock`) but replaces its busy-wait polling loops with plain
//! `tokio::sync::Mutex` acquisition — tokio documents its `Mutex` as FIFO,
//! which gives the fairness guarantee for free instead of hand-rolled
//! queueing. Keys are locked in sorted order for any multi-key operation so
//! two transactions over overlapping key sets can never deadlock against
//! each other, which is why `K: Ord` is required here.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

tokio::task_local! {
    static CURRENT_TXN: RefCell<Option<TxnContext>>;
}

#[derive(Clone)]
struct TxnContext {
    keys: Arc<HashSet<u64>>,
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Per-key writer locks plus whole-key-set transactions.
pub struct Locksmith<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    key_locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Locksmith<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    /// Construct an empty locksmith (no keys currently locked).
    pub fn new() -> Self {
        Self {
            key_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn sorted_unique(keys: impl IntoIterator<Item = K>) -> Vec<K> {
        let mut v: Vec<K> = keys.into_iter().collect();
        v.sort();
        v.dedup();
        v
    }

    fn covered_by_current_txn(&self, keys: &[K]) -> bool {
        CURRENT_TXN
            .try_with(|cell| {
                cell.borrow()
                    .as_ref()
                    .map(|ctx| keys.iter().all(|k| ctx.keys.contains(&hash_key(k))))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// `with_write_lock(keys, f)` (§4.C).
    ///
    /// `transactional` mirrors `CacheConfig::transactional`: when false and a
    /// single requested key is currently unlocked, `f` runs inline without
    /// taking the formal lock (the optimistic path) — correct as long as
    /// `f` performs one atomic entry-store primitive. Any contention, any
    /// multi-key request, or `transactional=true` falls through to proper
    /// per-key serialization.
    pub async fn with_write_lock<F, Fut, R>(
        &self,
        keys: impl IntoIterator<Item = K>,
        transactional: bool,
        f: F,
    ) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let keys = Self::sorted_unique(keys);

        if self.covered_by_current_txn(&keys) {
            return f().await;
        }

        if !transactional {
            if let [only] = keys.as_slice() {
                let lock = self.lock_for(only);
                if let Ok(guard) = lock.try_lock() {
                    let _guard = guard;
                    return f().await;
                }
            }
        }

        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock_for(key).lock_owned().await);
        }
        let result = f().await;
        drop(guards);
        result
    }

    /// `with_transaction(key_set, f)` (§4.C).
    ///
    /// Acquires every key in the set (sorted, to stay deadlock-free against
    /// concurrent transactions), runs `f` with those keys marked as "owned
    /// by the current transaction" so nested `with_write_lock`/
    /// `with_transaction` calls on the same keys from the same async task
    /// reuse the outer lock set instead of deadlocking on themselves.
    pub async fn with_transaction<F, Fut, R>(&self, keys: impl IntoIterator<Item = K>, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let keys = Self::sorted_unique(keys);

        if self.covered_by_current_txn(&keys) {
            return f().await;
        }

        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock_for(key).lock_owned().await);
        }

        let hashed: HashSet<u64> = keys.iter().map(hash_key).collect();
        let ctx = TxnContext {
            keys: Arc::new(hashed),
        };

        let result = CURRENT_TXN.scope(RefCell::new(Some(ctx)), f()).await;
        drop(guards);
        result
    }
}

impl<K> Default for Locksmith<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
