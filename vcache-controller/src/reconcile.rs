//! Reconciliation bridge between the dispatch loop and the entry store.
//!
//! A reconcile invocation reads external state for one target and then does
//! exactly one of two writes: upsert the derived entry when the backing
//! resource exists, or remove the key when it does not. Failures surface to
//! the caller; the bridge never retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vcache_core::{Entry, ReconcileError, StoreError, VcacheError, VcacheResult};
use vcache_events::ReconcileTarget;
use vcache_storage::{Store, StoreWriter};

/// Outcome of a successful reconcile invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Run the target again after the base requeue delay.
    pub requeue: bool,
    /// Run the target again after this exact delay. Takes precedence over `requeue`.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }
}

/// User-supplied reconciliation function.
///
/// Must be idempotent given the same external state: targets are redelivered
/// on events and retried on failure.
#[async_trait]
pub trait Reconciler<T: Entry>: Send + Sync {
    async fn reconcile(
        &self,
        store: Arc<Store<T>>,
        target: ReconcileTarget,
    ) -> VcacheResult<ReconcileResult>;
}

/// Closure adapter returned by [`reconcile_fn`].
pub struct ReconcileFn<F>(F);

/// Use an async closure as a [`Reconciler`].
pub fn reconcile_fn<T, F, Fut>(f: F) -> ReconcileFn<F>
where
    T: Entry,
    F: Fn(Arc<Store<T>>, ReconcileTarget) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VcacheResult<ReconcileResult>> + Send + 'static,
{
    ReconcileFn(f)
}

#[async_trait]
impl<T, F, Fut> Reconciler<T> for ReconcileFn<F>
where
    T: Entry,
    F: Fn(Arc<Store<T>>, ReconcileTarget) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VcacheResult<ReconcileResult>> + Send + 'static,
{
    async fn reconcile(
        &self,
        store: Arc<Store<T>>,
        target: ReconcileTarget,
    ) -> VcacheResult<ReconcileResult> {
        (self.0)(store, target).await
    }
}

/// Apply the result of reading external state for `target`.
///
/// `Some(entry)` upserts the derived entry, `None` removes the target's key.
/// A derived entry whose key differs from the target is rejected, leaving
/// the store untouched.
pub fn resolve<T: Entry>(
    store: &Store<T>,
    target: &ReconcileTarget,
    derived: Option<T>,
) -> VcacheResult<()> {
    match derived {
        Some(entry) => {
            let key = entry.key()?;
            if &key != target {
                return Err(StoreError::InvalidEntry {
                    reason: format!("derived entry {} does not match target {}", key, target),
                }
                .into());
            }
            store.upsert(&entry)
        }
        None => {
            store.remove_key(target)?;
            Ok(())
        }
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

/// What the dispatch loop invokes for each target.
#[async_trait]
pub trait ReconcileHandler: Send + Sync {
    async fn handle(&self, target: ReconcileTarget) -> Result<ReconcileResult, ReconcileError>;
}

/// Binds a [`Reconciler`] to the store it writes to.
pub struct ReconcileBridge<T: Entry> {
    store: Arc<Store<T>>,
    reconciler: Arc<dyn Reconciler<T>>,
}

impl<T: Entry> ReconcileBridge<T> {
    pub fn new(store: Arc<Store<T>>, reconciler: Arc<dyn Reconciler<T>>) -> Self {
        Self { store, reconciler }
    }

    pub fn store(&self) -> &Arc<Store<T>> {
        &self.store
    }
}

#[async_trait]
impl<T: Entry> ReconcileHandler for ReconcileBridge<T> {
    async fn handle(&self, target: ReconcileTarget) -> Result<ReconcileResult, ReconcileError> {
        match self
            .reconciler
            .reconcile(Arc::clone(&self.store), target.clone())
            .await
        {
            Ok(result) => {
                tracing::debug!(
                    key = %target,
                    requeue = result.requeue,
                    requeue_after = ?result.requeue_after,
                    "Reconcile succeeded"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(key = %target, error = %e, "Reconcile failed");
                Err(match e {
                    VcacheError::Reconcile(inner) => inner,
                    other => ReconcileError::Failed {
                        target,
                        source: Box::new(other),
                    },
                })
            }
        }
    }
}
