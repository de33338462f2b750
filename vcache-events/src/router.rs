//! Event-to-target routing

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use vcache_core::ObjectKey;

use crate::{ResourceType, WatchEvent};

/// Identity of the entry a reconcile invocation recomputes.
pub type ReconcileTarget = ObjectKey;

/// Maps an event on a watched resource to the targets it affects.
pub type MapFn = Arc<dyn Fn(&WatchEvent) -> Vec<ReconcileTarget> + Send + Sync>;

/// Wrap a closure as a [`MapFn`].
pub fn map_fn<F>(f: F) -> MapFn
where
    F: Fn(&WatchEvent) -> Vec<ReconcileTarget> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How events of one resource type become reconcile targets.
#[derive(Clone)]
pub enum EventHandler {
    /// The target is the event object's own key.
    EnqueueForObject,
    /// The targets are computed from the event.
    EnqueueMapped(MapFn),
}

impl EventHandler {
    pub fn mapped<F>(f: F) -> Self
    where
        F: Fn(&WatchEvent) -> Vec<ReconcileTarget> + Send + Sync + 'static,
    {
        EventHandler::EnqueueMapped(Arc::new(f))
    }

    /// Targets for one event, sorted and free of duplicates.
    pub fn targets(&self, event: &WatchEvent) -> Vec<ReconcileTarget> {
        match self {
            EventHandler::EnqueueForObject => vec![event.key.clone()],
            EventHandler::EnqueueMapped(f) => f(event)
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHandler::EnqueueForObject => f.write_str("EnqueueForObject"),
            EventHandler::EnqueueMapped(_) => f.write_str("EnqueueMapped(..)"),
        }
    }
}

/// Routing table of one cache: the primary resource plus its watches.
#[derive(Debug, Clone)]
pub struct EventRouter {
    primary: ResourceType,
    handlers: BTreeMap<ResourceType, EventHandler>,
}

impl EventRouter {
    /// Router whose primary resource's events target their own key.
    pub fn new(primary: ResourceType) -> Self {
        let mut handlers = BTreeMap::new();
        handlers.insert(primary.clone(), EventHandler::EnqueueForObject);
        Self { primary, handlers }
    }

    /// Register the handler for a watched resource type.
    ///
    /// The primary resource keeps `EnqueueForObject`; watching it again is
    /// ignored.
    pub fn watch(&mut self, resource: ResourceType, handler: EventHandler) -> &mut Self {
        if resource != self.primary {
            self.handlers.insert(resource, handler);
        }
        self
    }

    /// Builder form of [`EventRouter::watch`].
    pub fn with_watch(mut self, resource: ResourceType, handler: EventHandler) -> Self {
        self.watch(resource, handler);
        self
    }

    pub fn primary(&self) -> &ResourceType {
        &self.primary
    }

    pub fn is_watched(&self, resource: &ResourceType) -> bool {
        self.handlers.contains_key(resource)
    }

    /// Every routed resource type, the primary included.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceType> {
        self.handlers.keys()
    }

    /// Targets affected by an event. Events of unwatched types affect none.
    pub fn route(&self, event: &WatchEvent) -> Vec<ReconcileTarget> {
        self.handlers
            .get(&event.resource)
            .map(|handler| handler.targets(event))
            .unwrap_or_default()
    }
}
