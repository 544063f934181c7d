//! Cache configuration (§3 "Cache configuration" table).
//!
//! Immutable once built, `serde`-(de)serializable, and validated
//! synchronously before any background service starts — in the teacher's
//! `TierConfig`/`LockConfig`/`StrategyConfig` idiom (a plain struct with a
//! `Default` impl plus a companion builder).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Whether eviction runs after every write or on its own timer (§3
/// `eviction_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionModeConfig {
    /// Run after every mutating action.
    Evented,
    /// Run on a recurring timer at the given period, in milliseconds.
    Scheduled { period_ms: u64 },
}

/// Resolved, validated cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Identity of the cache instance (§3 `name`).
    pub name: String,
    /// Default expiration applied when a writer omits one, in milliseconds.
    pub default_expiration_ms: Option<u64>,
    /// If true, reads also purge encountered expired entries.
    pub lazy_expiration: bool,
    /// Sweep period for the janitor; `None` disables periodic sweeps.
    pub janitor_interval_ms: Option<u64>,
    /// Sampled-purge escape hatch (SPEC_FULL supplement); `None` is a full
    /// sweep every tick.
    pub janitor_sample_size: Option<usize>,
    /// Optional cap on live entries.
    pub size_limit: Option<usize>,
    /// Fraction of `size_limit` to free per eviction pass, in `(0, 1]`.
    pub reclaim_fraction: f64,
    /// Eviction trigger mode.
    pub eviction_mode: EvictionModeConfig,
    /// If true, every write is queued through the locksmith; if false,
    /// uncontended single-key writes may bypass it.
    pub transactional: bool,
    /// If true, preserve insertion order for iteration.
    pub ordered: bool,
    /// Whether a size-limit was configured and a stats hook is implied.
    pub install_stats_hook: bool,
}

impl CacheConfig {
    /// A builder pre-seeded with this config's values.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Default expiration as a `Duration`, if configured.
    pub fn default_expiration(&self) -> Option<Duration> {
        self.default_expiration_ms.map(Duration::from_millis)
    }

    /// Janitor interval as a `Duration`, if configured.
    pub fn janitor_interval(&self) -> Option<Duration> {
        self.janitor_interval_ms.map(Duration::from_millis)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            default_expiration_ms: None,
            lazy_expiration: true,
            janitor_interval_ms: None,
            janitor_sample_size: None,
            size_limit: None,
            reclaim_fraction: 0.1,
            eviction_mode: EvictionModeConfig::Evented,
            transactional: false,
            ordered: false,
            install_stats_hook: false,
        }
    }
}

/// Builder for [`CacheConfig`], validated at [`CacheConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }
}

impl CacheConfigBuilder {
    /// Set the cache's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the default expiration applied when a writer omits one.
    pub fn default_expiration(mut self, ttl: Duration) -> Self {
        self.config.default_expiration_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Enable or disable lazy expiration on read.
    pub fn lazy_expiration(mut self, enabled: bool) -> Self {
        self.config.lazy_expiration = enabled;
        self
    }

    /// Set the janitor sweep period; `None` disables periodic sweeps.
    pub fn janitor_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.janitor_interval_ms = interval.map(|d| d.as_millis() as u64);
        self
    }

    /// Enable the sampled-purge escape hatch with the given per-tick
    /// sample size.
    pub fn janitor_sample_size(mut self, sample_size: Option<usize>) -> Self {
        self.config.janitor_sample_size = sample_size;
        self
    }

    /// Set the live-entry size bound.
    pub fn size_limit(mut self, limit: Option<usize>) -> Self {
        self.config.size_limit = limit;
        self
    }

    /// Set the reclaim fraction, in `(0, 1]`.
    pub fn reclaim_fraction(mut self, fraction: f64) -> Self {
        self.config.reclaim_fraction = fraction;
        self
    }

    /// Set the eviction trigger mode.
    pub fn eviction_mode(mut self, mode: EvictionModeConfig) -> Self {
        self.config.eviction_mode = mode;
        self
    }

    /// Enable or disable transactional (always-locked) writes.
    pub fn transactional(mut self, enabled: bool) -> Self {
        self.config.transactional = enabled;
        self
    }

    /// Enable or disable insertion-order-preserving iteration.
    pub fn ordered(mut self, enabled: bool) -> Self {
        self.config.ordered = enabled;
        self
    }

    /// Install the built-in stats hook.
    pub fn with_stats_hook(mut self, enabled: bool) -> Self {
        self.config.install_stats_hook = enabled;
        self
    }

    /// Validate and produce the final configuration.
    pub fn build(self) -> CacheResult<CacheConfig> {
        let config = self.config;

        if config.name.trim().is_empty() {
            return Err(CacheError::InvalidName("name must not be empty".into()));
        }
        if !(config.reclaim_fraction > 0.0 && config.reclaim_fraction <= 1.0) {
            return Err(CacheError::InvalidLimit(format!(
                "reclaim_fraction must be in (0, 1], got {}",
                config.reclaim_fraction
            )));
        }
        if let Some(limit) = config.size_limit {
            if limit == 0 {
                return Err(CacheError::InvalidLimit("size_limit must be > 0".into()));
            }
        }
        if let Some(n) = config.janitor_sample_size {
            if n == 0 {
                return Err(CacheError::InvalidOption(
                    "janitor_sample_size must be > 0 when set".into(),
                ));
            }
        }

        Ok(config)
    }
}
