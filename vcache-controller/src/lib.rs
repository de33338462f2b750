//! VCache Controller - Reconciliation, Dispatch and the Cache Facade
//!
//! Wires the entry store to its sources of truth:
//!
//! ```text
//! WatchEvent ─► EventRouter ─► QueueDispatcher ─► ReconcileBridge ─► Store
//!                                                                     ▲
//!                                            Cache::get / Cache::list ┘
//! ```
//!
//! The dispatcher serializes invocations per target and owns retries; the
//! bridge runs the user's [`Reconciler`] once per invocation and surfaces
//! its errors; the [`Cache`] exposes read-only access to the result.

mod cache;
mod config;
mod dispatch;
mod reconcile;

pub use cache::Cache;
pub use config::{
    CacheOptions, DispatcherConfig, DEFAULT_EVENT_BUFFER, DEFAULT_MAX_CONCURRENT_RECONCILES,
    DEFAULT_MAX_REQUEUE_BACKOFF, DEFAULT_REQUEUE_BACKOFF,
};
pub use dispatch::{Dispatcher, DispatcherStats, DispatcherStatsSnapshot, QueueDispatcher};
pub use reconcile::{
    reconcile_fn, resolve, ReconcileBridge, ReconcileFn, ReconcileHandler, ReconcileResult,
    Reconciler,
};

// Re-export the types callers need alongside the facade
pub use vcache_events::{EventHandler, EventKind, EventRouter, ReconcileTarget, ResourceType, WatchEvent};
pub use vcache_storage::{Indexers, Store, StoreReader, StoreWriter};
