//! Read-only cache facade over a reconciled store.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use vcache_core::{
    Entry, ListOptions, ObjectKey, StoreError, TypeScheme, VcacheError, VcacheResult,
};
use vcache_events::{EventHandler, EventRouter, ResourceType};
use vcache_storage::{Store, StoreReader};

use crate::config::CacheOptions;
use crate::dispatch::Dispatcher;
use crate::reconcile::{ReconcileBridge, ReconcileHandler, Reconciler};

/// Materialized view of entries of type `T`, kept in sync by reconciliation.
///
/// Reads go straight to the store. The only translation performed is on
/// `get`: a missing key becomes a resource-shaped not-found error built from
/// the type scheme.
pub struct Cache<T: Entry> {
    store: Arc<Store<T>>,
    router: EventRouter,
    scheme: TypeScheme,
    handler: Arc<dyn ReconcileHandler>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<T: Entry> Cache<T> {
    /// Build the store, routing table and reconcile bridge from `options`.
    ///
    /// Events of the primary resource type [`ResourceType::of::<T>()`]
    /// target their own key.
    pub fn new<R>(
        options: CacheOptions<T>,
        reconciler: R,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> VcacheResult<Self>
    where
        R: Reconciler<T> + 'static,
    {
        let CacheOptions {
            indexers,
            watches,
            scheme,
        } = options;

        let store = Arc::new(Store::with_indexers(indexers)?);

        let mut router = EventRouter::new(ResourceType::of::<T>());
        for (resource, map) in watches {
            router.watch(resource, EventHandler::EnqueueMapped(map));
        }

        let handler: Arc<dyn ReconcileHandler> =
            Arc::new(ReconcileBridge::new(Arc::clone(&store), Arc::new(reconciler)));

        Ok(Self {
            store,
            router,
            scheme,
            handler,
            dispatcher,
        })
    }

    /// Run the dispatch loop until `shutdown` turns true.
    ///
    /// In-flight reconciles finish before this returns.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> VcacheResult<()> {
        self.dispatcher
            .run(self.router.clone(), Arc::clone(&self.handler), shutdown)
            .await
    }

    /// Handle to the underlying store.
    pub fn store(&self) -> Arc<Store<T>> {
        Arc::clone(&self.store)
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn resource_type(&self) -> &ResourceType {
        self.router.primary()
    }

    fn not_found(&self, key: &ObjectKey) -> VcacheError {
        match self.scheme.group_kind_for::<T>() {
            Ok(gk) => VcacheError::NotFound {
                group: gk.group.clone(),
                kind: gk.kind.clone(),
                name: key.name.clone(),
            },
            Err(e) => e.into(),
        }
    }
}

impl<T: Entry> StoreReader<T> for Cache<T> {
    fn get(&self, key: &ObjectKey) -> VcacheResult<T> {
        self.store.get(key).map_err(|e| match e {
            VcacheError::Store(StoreError::NotFound { key }) => self.not_found(&key),
            other => other,
        })
    }

    fn list(&self, opts: &ListOptions) -> VcacheResult<Vec<T>> {
        self.store.list(opts)
    }
}

impl<T: Entry> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("resource", self.router.primary())
            .field("store", &self.store)
            .finish()
    }
}
