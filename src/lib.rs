//! # vaultkeep - in-process concurrent key/value cache
//!
//! A cache library for holding hot data in memory behind a single process,
//! with expiration, size-bound eviction, read-through loading, hooks, and
//! periodic warming.
//!
//! ## Architecture
//!
//! - `entry`: the stored value type and per-key bookkeeping
//! - `store`: the concurrent entry table and its match/select primitives
//! - `locksmith`: per-key write locks and whole-key-set transactions
//! - `expiration`: lazy purge-on-read and the periodic Janitor sweep
//! - `eviction`: least-recently-written size-bound eviction
//! - `hooks`: the pre/post/service observer pipeline and built-in stats
//! - `courier`: single-flight read-through loading for `fetch`
//! - `warmer`: periodic bulk-loading background tasks
//! - `codec`: the snapshot frame format, with optional gzip/lz4 compression
//! - `router`: key-to-node dispatch for distributed deployments
//! - `config`: cache configuration and its validated builder
//! - `cache`: the public `Cache<K>` handle wiring every component together
//! - `time`: the monotonic clock abstraction used throughout

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod time;
pub mod entry;
pub mod store;
pub mod locksmith;
pub mod expiration;
pub mod eviction;
pub mod hooks;
pub mod config;
pub mod courier;
pub mod warmer;
pub mod codec;
pub mod router;
pub mod cache;

// Re-export commonly used types
pub use cache::{create, lookup, remove, Cache, Command, CommandKind, PutOptions, Ttl, UpdateDecision};
pub use config::{CacheConfig, CacheConfigBuilder, EvictionModeConfig};
pub use entry::{Entry, Value};
pub use error::{CacheError, CacheResult};
pub use hooks::{Hook, HookType, NotifyResult, Subscription};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
