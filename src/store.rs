//! Entry store and lookup engine (§4.A).
//!
//! A concurrent keyed table with atomic lookup/insert/modify/take/delete and
//! a compiled match/select mechanism for bulk predicates ("all keys", "all
//! expired keys", ...). Built on [`DashMap`] the way the teacher's
//! `MultiTierCache`/`LruCache` keep their tiers (`src/cache/tier.rs`) —
//! sharded, lock-striped, safe to mutate from many callers at once without a
//! single global lock.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;

use crate::entry::{Entry, Value};

/// A single atomic update to apply to an existing entry (§4.A
/// `modify_fields`). Grouped into a slice so `update`/`refresh`/`expire`/
/// `touch` can each express "patch exactly these fields, nothing else" in
/// one atomic step.
#[derive(Debug, Clone)]
pub enum FieldPatch {
    /// Replace the stored value.
    Value(Value),
    /// Replace `modified`.
    Modified(i64),
    /// Replace `expiration`.
    Expiration(Option<Duration>),
}

/// A compiled predicate over the store, built once per call rather than
/// re-parsed per entry (§4.A: "The engine SHOULD compile predicates once").
#[derive(Debug, Clone, Copy)]
pub enum MatchSpec {
    /// Every entry, live or not.
    All,
    /// Only entries live at the given clock reading.
    Unexpired(i64),
    /// Only entries expired at the given clock reading.
    Expired(i64),
}

impl MatchSpec {
    fn matches<K>(&self, entry: &Entry<K>) -> bool {
        match self {
            MatchSpec::All => true,
            MatchSpec::Unexpired(now) => entry.is_live_at(*now),
            MatchSpec::Expired(now) => !entry.is_live_at(*now),
        }
    }
}

/// The concurrent entry table.
#[derive(Debug)]
pub struct EntryStore<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: DashMap<K, Entry<K>>,
}

impl<K> EntryStore<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Construct an empty store.
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// `lookup(key) -> entry | none`.
    pub fn lookup(&self, key: &K) -> Option<Entry<K>> {
        self.inner.get(key).map(|r| r.clone())
    }

    /// `insert(entry)` — overwrites any existing entry for the key.
    pub fn insert(&self, entry: Entry<K>) {
        self.inner.insert(entry.key.clone(), entry);
    }

    /// `modify_fields(key, patches) -> bool`: atomically applies `patches`
    /// only if `key` exists; returns whether it existed.
    pub fn modify_fields(&self, key: &K, patches: &[FieldPatch]) -> bool {
        match self.inner.get_mut(key) {
            Some(mut entry) => {
                for patch in patches {
                    match patch {
                        FieldPatch::Value(v) => entry.value = v.clone(),
                        FieldPatch::Modified(m) => entry.modified = *m,
                        FieldPatch::Expiration(e) => entry.expiration = *e,
                    }
                }
                true
            }
            None => false,
        }
    }

    /// `delete(key) -> bool`.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    /// `take(key) -> entry | none` — remove and return in one step.
    pub fn take(&self, key: &K) -> Option<Entry<K>> {
        self.inner.remove(key).map(|(_, entry)| entry)
    }

    /// `counter_update(key, delta, default_entry) -> new_number`.
    ///
    /// Atomically increments the numeric value, inserting `default_entry`
    /// if the key is missing. Fails with `Err(())` — no write — if the
    /// existing value is non-numeric (§3: "a counter-update on a
    /// non-numeric value fails the operation atomically").
    pub fn counter_update(
        &self,
        key: &K,
        delta: i64,
        default_entry: impl FnOnce() -> Entry<K>,
    ) -> Result<i64, ()> {
        let mut entry = self.inner.entry(key.clone()).or_insert_with(default_entry);
        match entry.value.as_int() {
            Some(current) => {
                let next = current.wrapping_add(delta);
                entry.value = Value::Int(next);
                Ok(next)
            }
            None => Err(()),
        }
    }

    /// `size() -> count`, including entries not yet purged.
    pub fn size(&self) -> usize {
        self.inner.len()
    }

    /// `iterate(match_spec) -> entries` matching the compiled predicate.
    pub fn iterate(&self, spec: MatchSpec) -> Vec<Entry<K>> {
        self.inner
            .iter()
            .filter(|r| spec.matches(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Projection used by the eviction engine: `(key, modified)` pairs for
    /// every entry matching `spec`, without cloning the value payload.
    pub fn project_key_modified(&self, spec: MatchSpec) -> Vec<(K, i64)> {
        self.inner
            .iter()
            .filter(|r| spec.matches(r.value()))
            .map(|r| (r.key().clone(), r.value().modified))
            .collect()
    }

    /// `select_count(match_spec) -> count`.
    pub fn select_count(&self, spec: MatchSpec) -> usize {
        self.inner.iter().filter(|r| spec.matches(r.value())).count()
    }

    /// `select_delete(match_spec) -> removed_count`.
    pub fn select_delete(&self, spec: MatchSpec) -> usize {
        let victims: Vec<K> = self
            .inner
            .iter()
            .filter(|r| spec.matches(r.value()))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for key in victims {
            if self.inner.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Delete every key in `keys`, returning the number actually removed.
    /// Used by the eviction engine once it has sorted `(key, modified)`
    /// projections and picked the oldest victims.
    pub fn delete_many(&self, keys: &[K]) -> usize {
        keys.iter().filter(|k| self.inner.remove(k).is_some()).count()
    }

    /// Remove every entry (`clear`).
    pub fn clear(&self) -> usize {
        let n = self.inner.len();
        self.inner.clear();
        n
    }
}

impl<K> Default for EntryStore<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
