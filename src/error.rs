//! Crate-wide error types
//!
//! Every fallible public operation on [`crate::Cache`] returns a
//! [`CacheResult`]. Errors are categorized by canonical kind so callers can
//! match on them instead of parsing messages.

use thiserror::Error;

/// Cache operation errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No cache is registered under the requested name.
    #[error("no cache registered under name: {0}")]
    NoCache(String),

    /// The cache's background services have not been started yet.
    #[error("cache not started: {0}")]
    NotStarted(String),

    /// A cache name failed validation (empty, already taken, etc).
    #[error("invalid cache name: {0}")]
    InvalidName(String),

    /// A configuration option failed validation.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// `put_many`/`import` received a malformed pair list.
    #[error("invalid pairs: {0}")]
    InvalidPairs(String),

    /// A match/select specification could not be compiled.
    #[error("invalid match spec: {0}")]
    InvalidMatch(String),

    /// `invoke` was asked to run a command that isn't registered.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A requested expiration value is not representable.
    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    /// A hook definition failed validation (duplicate name, bad config).
    #[error("invalid hook: {0}")]
    InvalidHook(String),

    /// `size_limit`/`reclaim_fraction` failed validation.
    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    /// A router implementation rejected an attach/detach request.
    #[error("invalid router: {0}")]
    InvalidRouter(String),

    /// A warmer definition failed validation.
    #[error("invalid warmer: {0}")]
    InvalidWarmer(String),

    /// `purge`/`inspect(janitor, ..)` requested on a cache with no janitor.
    #[error("janitor disabled for this cache")]
    JanitorDisabled,

    /// Statistics were requested but no stats hook is installed.
    #[error("stats hook not installed")]
    StatsDisabled,

    /// `increment` targeted a key whose stored value isn't numeric.
    #[error("value is not numeric")]
    NonNumericValue,

    /// A distributed-only operation was called on a non-distributed cache.
    #[error("cache has no router installed")]
    NonDistributed,

    /// A multi-key operation's keys spanned more than one router node.
    #[error("operation keys span more than one node")]
    CrossSlot,

    /// A snapshot path pointed at a directory.
    #[error("path is a directory: {0}")]
    Eisdir(String),

    /// A snapshot path does not exist or is unreachable.
    #[error("path not reachable: {0}")]
    Enoent(String),

    /// A snapshot frame failed to decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// Underlying I/O failure during dump/restore.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A user-supplied loader, command, or transaction body failed.
    #[error("callback error: {0}")]
    Callback(String),
}

/// Result type returned by every cache operation.
pub type CacheResult<T> = Result<T, CacheError>;
