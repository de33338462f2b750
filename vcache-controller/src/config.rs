//! Construction-time configuration of the cache and its dispatch loop.

use std::fmt;
use std::time::Duration;

use vcache_core::{ConfigError, TypeScheme, VcacheError, VcacheResult};
use vcache_events::{map_fn, MapFn, ReconcileTarget, ResourceType, WatchEvent};
use vcache_storage::Indexers;

/// Default number of reconciles allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 1;

/// Default delay before the first retry of a failed target.
pub const DEFAULT_REQUEUE_BACKOFF: Duration = Duration::from_secs(1);

/// Default cap on the retry delay of a repeatedly failing target.
pub const DEFAULT_MAX_REQUEUE_BACKOFF: Duration = Duration::from_secs(60);

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

// ============================================================================
// CACHE OPTIONS
// ============================================================================

/// Options recognized when building a [`Cache`](crate::Cache).
///
/// Every field defaults to empty: no extra indexes, no watches beyond the
/// primary resource, and an empty scheme.
pub struct CacheOptions<T> {
    pub indexers: Indexers<T>,
    pub watches: Vec<(ResourceType, MapFn)>,
    pub scheme: TypeScheme,
}

impl<T> CacheOptions<T> {
    pub fn new() -> Self {
        Self {
            indexers: Indexers::new(),
            watches: Vec::new(),
            scheme: TypeScheme::new(),
        }
    }

    /// Register a named index function.
    pub fn with_indexer<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        self.indexers.insert(name, func);
        self
    }

    /// Replace the whole set of index functions.
    pub fn with_indexers(mut self, indexers: Indexers<T>) -> Self {
        self.indexers = indexers;
        self
    }

    /// Watch another resource type, mapping each of its events to targets.
    pub fn with_watch<F>(mut self, resource: ResourceType, func: F) -> Self
    where
        F: Fn(&WatchEvent) -> Vec<ReconcileTarget> + Send + Sync + 'static,
    {
        self.watches.push((resource, map_fn(func)));
        self
    }

    pub fn with_scheme(mut self, scheme: TypeScheme) -> Self {
        self.scheme = scheme;
        self
    }
}

impl<T> Default for CacheOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CacheOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("indexers", &self.indexers)
            .field(
                "watches",
                &self.watches.iter().map(|(r, _)| r.as_str()).collect::<Vec<_>>(),
            )
            .field("scheme", &self.scheme.len())
            .finish()
    }
}

// ============================================================================
// DISPATCHER CONFIG
// ============================================================================

/// Configuration of the in-process [`QueueDispatcher`](crate::QueueDispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Reconciles allowed to run at once, across distinct targets (default: 1)
    pub max_concurrent_reconciles: usize,

    /// Retry delay after the first failure of a target, doubled on every
    /// further consecutive failure (default: 1 second)
    pub requeue_backoff: Duration,

    /// Upper bound of the retry delay (default: 60 seconds)
    pub max_requeue_backoff: Duration,

    /// Capacity of the event channel (default: 1024)
    pub event_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            requeue_backoff: DEFAULT_REQUEUE_BACKOFF,
            max_requeue_backoff: DEFAULT_MAX_REQUEUE_BACKOFF,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max;
        self
    }

    pub fn with_requeue_backoff(mut self, backoff: Duration) -> Self {
        self.requeue_backoff = backoff;
        self
    }

    pub fn with_max_requeue_backoff(mut self, backoff: Duration) -> Self {
        self.max_requeue_backoff = backoff;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> VcacheResult<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(VcacheError::Config(ConfigError::InvalidValue {
                field: "max_concurrent_reconciles".to_string(),
                value: self.max_concurrent_reconciles.to_string(),
                reason: "max_concurrent_reconciles must be greater than 0".to_string(),
            }));
        }

        if self.event_buffer == 0 {
            return Err(VcacheError::Config(ConfigError::InvalidValue {
                field: "event_buffer".to_string(),
                value: self.event_buffer.to_string(),
                reason: "event_buffer must be greater than 0".to_string(),
            }));
        }

        if self.max_requeue_backoff < self.requeue_backoff {
            return Err(VcacheError::Config(ConfigError::InvalidValue {
                field: "max_requeue_backoff".to_string(),
                value: format!("{:?}", self.max_requeue_backoff),
                reason: "max_requeue_backoff must not be below requeue_backoff".to_string(),
            }));
        }

        Ok(())
    }

    /// Retry delay after `failures` consecutive failures of one target.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.requeue_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_requeue_backoff)
            .min(self.max_requeue_backoff)
    }
}
