//! Entry data model (§3).
//!
//! An [`Entry`] is the unit the store keeps per key: the value plus the
//! bookkeeping (`modified`, `expiration`) that the expiration and eviction
//! subsystems read. `modified` is monotonic per key — every touch, refresh,
//! write, or increment advances it to the current clock reading.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dynamically-typed value stored in the cache.
///
/// `increment` needs runtime type discrimination (§4.A `counter_update`):
/// an increment against a `Bytes`/`Text` value must fail atomically rather
/// than silently coercing. Values otherwise round-trip opaquely through
/// the codec (§4.J) regardless of variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A signed integer counter.
    Int(i64),
    /// An opaque UTF-8 string.
    Text(String),
    /// Opaque binary payload.
    Bytes(Vec<u8>),
}

impl Value {
    /// Read this value as an integer, if it holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// True if this value is numeric (`increment`-eligible).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// A stored record: key, write time, optional TTL, and value.
///
/// Liveness (§3 invariants): an entry is live iff `expiration` is `None` or
/// `modified + expiration > now`.
#[derive(Debug, Clone)]
pub struct Entry<K> {
    /// The entry's key, kept alongside the value so match/select
    /// projections (`(key, modified)`) don't need a second map lookup.
    pub key: K,
    /// Milliseconds-since-clock-epoch when this entry was last written or
    /// touched.
    pub modified: i64,
    /// Duration after `modified` at which the entry becomes invalid, or
    /// `None` for no expiry.
    pub expiration: Option<Duration>,
    /// The stored value.
    pub value: Value,
}

impl<K> Entry<K> {
    /// Construct a new entry stamped with `modified = now_ms`.
    pub fn new(key: K, value: Value, expiration: Option<Duration>, now_ms: i64) -> Self {
        Self {
            key,
            modified: now_ms,
            expiration,
            value,
        }
    }

    /// True iff the entry is live at `now_ms` (§3 invariants).
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        match self.expiration {
            None => true,
            Some(ttl) => self.modified.saturating_add(ttl.as_millis() as i64) > now_ms,
        }
    }

    /// Remaining time-to-live at `now_ms`, or `None` if the entry never
    /// expires. Returns `Some(Duration::ZERO)` (not negative) once expired,
    /// since `ttl()` on an already-dead entry is only ever observed by a
    /// caller racing the janitor — it is reported as missing before this
    /// matters.
    pub fn ttl_at(&self, now_ms: i64) -> Option<Duration> {
        self.expiration.map(|ttl| {
            let deadline = self.modified.saturating_add(ttl.as_millis() as i64);
            let remaining = deadline - now_ms;
            if remaining <= 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(remaining as u64)
            }
        })
    }

    /// The absolute deadline (`modified + expiration`) in milliseconds, if
    /// this entry expires at all.
    pub fn deadline(&self) -> Option<i64> {
        self.expiration
            .map(|ttl| self.modified.saturating_add(ttl.as_millis() as i64))
    }
}
