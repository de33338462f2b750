//! End-to-end tests: watch events flow through the dispatcher and the
//! reconcile bridge into the store, and are read back through the cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vcache_controller::{
    reconcile_fn, resolve, Cache, CacheOptions, Dispatcher, DispatcherConfig, QueueDispatcher,
    ReconcileResult, ReconcileTarget, Reconciler, ResourceType, Store, StoreReader, StoreWriter,
    WatchEvent,
};
use vcache_core::{
    DispatchError, GroupKind, ListOptions, ObjectKey, ReconcileError, TypeScheme, VcacheError,
    VcacheResult,
};
use vcache_test_utils::{assertions, fixtures, index_fns, ConfigMap, VirtualConfigMap};

// ============================================================================
// HARNESS
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type ExternalState = Arc<Mutex<BTreeMap<ObjectKey, ConfigMap>>>;

/// Derives a `VirtualConfigMap` from the `ConfigMap` of the same key.
struct ConfigMapReconciler {
    config_maps: ExternalState,
}

#[async_trait]
impl Reconciler<VirtualConfigMap> for ConfigMapReconciler {
    async fn reconcile(
        &self,
        store: Arc<Store<VirtualConfigMap>>,
        target: ReconcileTarget,
    ) -> VcacheResult<ReconcileResult> {
        let source = self
            .config_maps
            .lock()
            .map_err(|_| ReconcileError::External {
                target: target.clone(),
                reason: "external state poisoned".to_string(),
            })?
            .get(&target)
            .cloned();
        resolve(
            &store,
            &target,
            source.as_ref().map(VirtualConfigMap::from_config_map),
        )?;
        Ok(ReconcileResult::done())
    }
}

fn config_map_type() -> ResourceType {
    ResourceType::new("ConfigMap")
}

fn scheme() -> TypeScheme {
    TypeScheme::new().with::<VirtualConfigMap>(GroupKind::new("vcache.io", "VirtualConfigMap"))
}

struct Harness {
    cache: Arc<Cache<VirtualConfigMap>>,
    dispatcher: Arc<QueueDispatcher>,
    events: mpsc::Sender<WatchEvent>,
    shutdown: watch::Sender<bool>,
    running: JoinHandle<VcacheResult<()>>,
}

impl Harness {
    fn start<R>(config: DispatcherConfig, reconciler: R) -> Self
    where
        R: Reconciler<VirtualConfigMap> + 'static,
    {
        init_tracing();
        let dispatcher = Arc::new(QueueDispatcher::new(config).unwrap());
        let options = CacheOptions::new()
            .with_scheme(scheme())
            .with_indexer("data", index_fns::data_key)
            .with_watch(config_map_type(), |event| vec![event.key.clone()]);
        let cache = Arc::new(Cache::new(options, reconciler, dispatcher.clone()).unwrap());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let running = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.start(shutdown_rx).await })
        };

        Self {
            cache,
            events: dispatcher.sender().unwrap(),
            dispatcher,
            shutdown,
            running,
        }
    }

    async fn send(&self, event: WatchEvent) {
        self.events.send(event).await.unwrap();
    }

    async fn stop(self) -> VcacheResult<()> {
        let _ = self.shutdown.send(true);
        self.running.await.unwrap()
    }
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn fast_retries() -> DispatcherConfig {
    DispatcherConfig::default()
        .with_requeue_backoff(Duration::from_millis(5))
        .with_max_requeue_backoff(Duration::from_millis(20))
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_source_changes_are_materialized() {
    let config_maps: ExternalState = Arc::default();
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::clone(&config_maps),
        },
    );
    let key = ObjectKey::new("test", "my-configmap");

    config_maps.lock().unwrap().insert(
        key.clone(),
        fixtures::config_map("test", "my-configmap", &[("key", "test")]),
    );
    harness
        .send(WatchEvent::added(config_map_type(), key.clone()))
        .await;

    let cache = Arc::clone(&harness.cache);
    assert!(eventually(|| cache.get(&key).is_ok()).await);
    let vcm = cache.get(&key).unwrap();
    assert_eq!(vcm.data_keys(), vec!["key".to_string()]);

    let by_data = cache
        .list(&ListOptions::new().matching_fields([("data", "key")]))
        .unwrap();
    assertions::assert_keys(&by_data, &["test/my-configmap"]);

    config_maps.lock().unwrap().remove(&key);
    harness
        .send(WatchEvent::deleted(config_map_type(), key.clone()))
        .await;

    assert!(eventually(|| cache.get(&key).is_err()).await);
    let err = cache.get(&key).unwrap_err();
    assert_eq!(
        err,
        VcacheError::NotFound {
            group: "vcache.io".to_string(),
            kind: "VirtualConfigMap".to_string(),
            name: "my-configmap".to_string(),
        }
    );

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_primary_events_target_own_key() {
    let config_maps: ExternalState = Arc::default();
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::clone(&config_maps),
        },
    );
    let key = ObjectKey::new("a", "x");
    config_maps
        .lock()
        .unwrap()
        .insert(key.clone(), fixtures::config_map("a", "x", &[]));

    harness
        .send(WatchEvent::modified(
            ResourceType::of::<VirtualConfigMap>(),
            key.clone(),
        ))
        .await;

    let cache = Arc::clone(&harness.cache);
    assert!(eventually(|| cache.get(&key).is_ok()).await);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_unwatched_events_are_ignored() {
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
    );
    harness
        .send(WatchEvent::added(
            ResourceType::new("Secret"),
            ObjectKey::new("a", "x"),
        ))
        .await;

    let dispatcher = Arc::clone(&harness.dispatcher);
    assert!(eventually(|| dispatcher.stats().events == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.stats().reconciles, 0);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_failures_are_retried_with_backoff() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let reconciler = {
        let attempts = Arc::clone(&attempts);
        reconcile_fn(
            move |store: Arc<Store<VirtualConfigMap>>, target: ReconcileTarget| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        return Err(VcacheError::from(ReconcileError::External {
                            target,
                            reason: format!("attempt {}", attempt),
                        }));
                    }
                    let entry =
                        VirtualConfigMap::new(target.namespace.clone(), target.name.clone());
                    resolve(&store, &target, Some(entry))?;
                    Ok(ReconcileResult::done())
                }
            },
        )
    };

    let harness = Harness::start(fast_retries(), reconciler);
    let key = ObjectKey::new("a", "flaky");
    harness
        .send(WatchEvent::added(config_map_type(), key.clone()))
        .await;

    let cache = Arc::clone(&harness.cache);
    assert!(eventually(|| cache.get(&key).is_ok()).await);
    let dispatcher = Arc::clone(&harness.dispatcher);
    assert!(eventually(|| dispatcher.stats().reconciles == 1).await);

    let stats = dispatcher.stats();
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.reconciles, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_requeue_after_runs_target_again() {
    let runs = Arc::new(AtomicUsize::new(0));
    let reconciler = {
        let runs = Arc::clone(&runs);
        reconcile_fn(
            move |_store: Arc<Store<VirtualConfigMap>>, _target: ReconcileTarget| {
                let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if run < 3 {
                        Ok::<_, VcacheError>(ReconcileResult::requeue_after(Duration::from_millis(5)))
                    } else {
                        Ok(ReconcileResult::done())
                    }
                }
            },
        )
    };

    let harness = Harness::start(fast_retries(), reconciler);
    harness
        .send(WatchEvent::added(config_map_type(), ObjectKey::new("a", "x")))
        .await;

    assert!(eventually(|| runs.load(Ordering::SeqCst) == 3).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(harness.dispatcher.stats().requeues, 2);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_concurrent_invocations_per_target() {
    let in_flight: Arc<Mutex<BTreeMap<ObjectKey, usize>>> = Arc::default();
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let reconciler = {
        let in_flight = Arc::clone(&in_flight);
        let overlaps = Arc::clone(&overlaps);
        let runs = Arc::clone(&runs);
        reconcile_fn(
            move |_store: Arc<Store<VirtualConfigMap>>, target: ReconcileTarget| {
                let in_flight = Arc::clone(&in_flight);
                let overlaps = Arc::clone(&overlaps);
                let runs = Arc::clone(&runs);
                async move {
                    {
                        let mut guard = in_flight.lock().unwrap();
                        let count = guard.entry(target.clone()).or_insert(0);
                        *count += 1;
                        if *count > 1 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if let Some(count) = in_flight.lock().unwrap().get_mut(&target) {
                        *count -= 1;
                    }
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, VcacheError>(ReconcileResult::done())
                }
            },
        )
    };

    let harness = Harness::start(
        DispatcherConfig::default().with_max_concurrent_reconciles(4),
        reconciler,
    );
    for i in 0..40 {
        let key = ObjectKey::new("a", format!("t{}", i % 4));
        harness
            .send(WatchEvent::modified(config_map_type(), key))
            .await;
    }

    let dispatcher = Arc::clone(&harness.dispatcher);
    assert!(eventually(|| dispatcher.stats().events == 40).await);
    harness.stop().await.unwrap();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let runs = runs.load(Ordering::SeqCst);
    assert!(runs >= 4, "every target reconciled at least once, got {}", runs);
    assert!(runs <= 40, "repeated events coalesce, got {}", runs);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_reconcile() {
    let finished = Arc::new(AtomicUsize::new(0));
    let reconciler = {
        let finished = Arc::clone(&finished);
        reconcile_fn(
            move |_store: Arc<Store<VirtualConfigMap>>, _target: ReconcileTarget| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, VcacheError>(ReconcileResult::done())
                }
            },
        )
    };

    let harness = Harness::start(DispatcherConfig::default(), reconciler);
    harness
        .send(WatchEvent::added(config_map_type(), ObjectKey::new("a", "slow")))
        .await;

    let dispatcher = Arc::clone(&harness.dispatcher);
    assert!(eventually(|| dispatcher.stats().events == 1).await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.stop().await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatcher_runs_once() {
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second: Cache<VirtualConfigMap> = Cache::new(
        CacheOptions::new(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
        harness.dispatcher.clone(),
    )
    .unwrap();
    let (_tx, rx) = watch::channel(false);
    let result = second.start(rx).await;
    assert_eq!(
        result,
        Err(VcacheError::Dispatch(DispatchError::AlreadyStarted))
    );

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_returns_immediately_when_already_cancelled() {
    let dispatcher = Arc::new(QueueDispatcher::new(DispatcherConfig::default()).unwrap());
    let cache: Cache<VirtualConfigMap> = Cache::new(
        CacheOptions::new(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
        dispatcher.clone(),
    )
    .unwrap();

    let (_tx, rx) = watch::channel(true);
    tokio::time::timeout(Duration::from_secs(1), cache.start(rx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatcher.stats().reconciles, 0);
}

#[tokio::test]
async fn test_store_handle_is_shared_with_reconciles() {
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
    );
    let store = harness.cache.store();
    let entry = fixtures::vcm("a", "stale");
    store.upsert(&entry).unwrap();

    harness
        .send(WatchEvent::deleted(config_map_type(), ObjectKey::new("a", "stale")))
        .await;

    let cache = Arc::clone(&harness.cache);
    assert!(eventually(|| cache.get(&ObjectKey::new("a", "stale")).is_err()).await);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_trait_object() {
    let dispatcher: Arc<dyn Dispatcher> =
        Arc::new(QueueDispatcher::new(DispatcherConfig::default()).unwrap());
    let cache: Cache<VirtualConfigMap> = Cache::new(
        CacheOptions::new(),
        ConfigMapReconciler {
            config_maps: Arc::default(),
        },
        dispatcher,
    )
    .unwrap();
    assert_eq!(cache.resource_type(), &ResourceType::of::<VirtualConfigMap>());
}

#[tokio::test]
async fn test_loop_outlives_closed_event_channel() {
    let config_maps: ExternalState = Arc::default();
    let harness = Harness::start(
        DispatcherConfig::default(),
        ConfigMapReconciler {
            config_maps: Arc::clone(&config_maps),
        },
    );
    let key = ObjectKey::new("a", "x");
    config_maps
        .lock()
        .unwrap()
        .insert(key.clone(), fixtures::config_map("a", "x", &[("k", "v")]));

    harness.dispatcher.close();
    assert!(matches!(
        harness.dispatcher.sender(),
        Err(VcacheError::Dispatch(DispatchError::ChannelClosed { .. }))
    ));

    harness
        .send(WatchEvent::added(config_map_type(), key.clone()))
        .await;
    let cache = Arc::clone(&harness.cache);
    assert!(eventually(|| cache.get(&key).is_ok()).await);

    let Harness {
        events,
        shutdown,
        running,
        ..
    } = harness;
    drop(events);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());

    shutdown.send(true).unwrap();
    running.await.unwrap().unwrap();
}
