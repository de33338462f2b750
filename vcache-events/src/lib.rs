//! VCache Events - Watch Events and Reconcile Target Routing
//!
//! This crate defines what the dispatch loop consumes and produces: change
//! notifications for watched resource types, and the mapping from each such
//! notification to the reconcile targets it affects.
//!
//! ```text
//! WatchEvent(primary)  ──EnqueueForObject──►  target = event key
//! WatchEvent(watched)  ──EnqueueMapped(f)───►  targets = f(event), deduplicated
//! ```
//!
//! # Key Types
//!
//! - `ResourceType`: names a watched resource type
//! - `WatchEvent`: one added/modified/deleted notification
//! - `EventHandler`: per-type event-to-target mapping
//! - `EventRouter`: the full routing table for one cache

mod event;
mod router;

pub use event::{EventKind, ResourceType, WatchEvent};
pub use router::{map_fn, EventHandler, EventRouter, MapFn, ReconcileTarget};
