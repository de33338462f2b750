//! Dispatch loop: turns watch events into serialized reconcile invocations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinSet};
use vcache_core::{DispatchError, ReconcileError, VcacheResult};
use vcache_events::{EventRouter, ReconcileTarget, WatchEvent};

use crate::config::DispatcherConfig;
use crate::reconcile::{ReconcileHandler, ReconcileResult};

/// Runs the watch/dispatch loop of a cache until shutdown.
///
/// Implementations must never run two invocations of the handler for the
/// same target at once. No ordering is promised across distinct targets.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn run(
        &self,
        router: EventRouter,
        handler: Arc<dyn ReconcileHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> VcacheResult<()>;
}

// ============================================================================
// STATS
// ============================================================================

/// Counters of dispatch activity since construction.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Watch events received
    pub events: AtomicU64,

    /// Reconcile invocations that succeeded
    pub reconciles: AtomicU64,

    /// Reconcile invocations that failed
    pub failures: AtomicU64,

    /// Targets scheduled to run again after a delay
    pub requeues: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            reconciles: self.reconciles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub events: u64,
    pub reconciles: u64,
    pub failures: u64,
    pub requeues: u64,
}

// ============================================================================
// QUEUE DISPATCHER
// ============================================================================

/// In-process dispatcher fed through a bounded tokio channel.
///
/// Each target is either queued, in flight or idle. Events for an in-flight
/// target mark it dirty and it runs once more after the current invocation.
/// Failed targets are retried with exponential backoff; a success resets
/// their backoff.
///
/// The event channel closes once [`QueueDispatcher::close`] has been called
/// and every handle from [`QueueDispatcher::sender`] is dropped. The loop
/// then keeps serving queued targets and retries until shutdown.
pub struct QueueDispatcher {
    config: DispatcherConfig,
    sender: StdMutex<Option<mpsc::Sender<WatchEvent>>>,
    receiver: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    stats: Arc<DispatcherStats>,
}

impl QueueDispatcher {
    pub fn new(config: DispatcherConfig) -> VcacheResult<Self> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.event_buffer);
        Ok(Self {
            config,
            sender: StdMutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            stats: Arc::new(DispatcherStats::default()),
        })
    }

    /// Handle for feeding watch events into the loop.
    pub fn sender(&self) -> VcacheResult<mpsc::Sender<WatchEvent>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                DispatchError::ChannelClosed {
                    reason: "dispatcher was closed".to_string(),
                }
                .into()
            })
    }

    /// Stop handing out senders and drop the dispatcher's own one.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }
}

#[async_trait]
impl Dispatcher for QueueDispatcher {
    async fn run(
        &self,
        router: EventRouter,
        handler: Arc<dyn ReconcileHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> VcacheResult<()> {
        let mut events = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or(DispatchError::AlreadyStarted)?;

        tracing::info!(
            resource = %router.primary(),
            max_concurrent_reconciles = self.config.max_concurrent_reconciles,
            "Dispatcher started"
        );

        let mut queue = WorkQueue::default();
        let mut workers: JoinSet<(ReconcileTarget, Result<ReconcileResult, ReconcileError>)> =
            JoinSet::new();
        let mut timers: JoinSet<ReconcileTarget> = JoinSet::new();
        let mut events_open = true;

        if !*shutdown.borrow() {
            loop {
                while workers.len() < self.config.max_concurrent_reconciles {
                    let Some(target) = queue.next_ready() else {
                        break;
                    };
                    spawn_reconcile(&mut workers, Arc::clone(&handler), target);
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }

                    event = events.recv(), if events_open => match event {
                        Some(event) => {
                            self.stats.events.fetch_add(1, Ordering::Relaxed);
                            for target in router.route(&event) {
                                queue.enqueue(target);
                            }
                        }
                        None => {
                            tracing::debug!(queued = queue.ready.len(), "Event channel closed");
                            events_open = false;
                        }
                    },

                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        if let Some((target, result)) = joined_worker(joined) {
                            if let Some(delay) = self.complete(&mut queue, &target, result) {
                                schedule(&mut timers, target.clone(), delay);
                            }
                            if queue.finish(&target) {
                                queue.enqueue(target);
                            }
                        }
                    }

                    Some(fired) = timers.join_next(), if !timers.is_empty() => {
                        if let Ok(target) = fired {
                            queue.enqueue(target);
                        }
                    }
                }
            }
        }

        tracing::info!(in_flight = workers.len(), "Dispatcher shutting down");
        timers.abort_all();
        while let Some(joined) = workers.join_next().await {
            if let Some((target, result)) = joined_worker(joined) {
                self.complete(&mut queue, &target, result);
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            events = stats.events,
            reconciles = stats.reconciles,
            failures = stats.failures,
            requeues = stats.requeues,
            "Dispatcher stopped"
        );
        Ok(())
    }
}

impl QueueDispatcher {
    /// Record a finished invocation and return the delay before its target
    /// should run again, if any.
    fn complete(
        &self,
        queue: &mut WorkQueue,
        target: &ReconcileTarget,
        result: Result<ReconcileResult, ReconcileError>,
    ) -> Option<Duration> {
        let delay = match result {
            Ok(result) => {
                self.stats.reconciles.fetch_add(1, Ordering::Relaxed);
                queue.failures.remove(target);
                match result.requeue_after {
                    Some(delay) => Some(delay),
                    None if result.requeue => Some(self.config.requeue_backoff),
                    None => None,
                }
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                let failures = queue.failures.entry(target.clone()).or_insert(0);
                *failures = failures.saturating_add(1);
                let delay = self.config.backoff_for(*failures);
                tracing::warn!(
                    key = %target,
                    error = %e,
                    failures = *failures,
                    retry_in = ?delay,
                    "Reconcile failed, requeueing"
                );
                Some(delay)
            }
        };
        if delay.is_some() {
            self.stats.requeues.fetch_add(1, Ordering::Relaxed);
        }
        delay
    }
}

/// Run one invocation on its own task so a panicking handler surfaces as
/// a failure of its target instead of losing it.
fn spawn_reconcile(
    workers: &mut JoinSet<(ReconcileTarget, Result<ReconcileResult, ReconcileError>)>,
    handler: Arc<dyn ReconcileHandler>,
    target: ReconcileTarget,
) {
    workers.spawn(async move {
        let task_target = target.clone();
        let result = tokio::spawn(async move { handler.handle(task_target).await })
            .await
            .unwrap_or_else(|e| {
                Err(ReconcileError::External {
                    target: target.clone(),
                    reason: format!("reconcile task aborted: {}", e),
                })
            });
        (target, result)
    });
}

/// Unwrap a finished worker. The outer task only fails when it is cancelled
/// or the runtime is shutting down, and then its target is unknown.
fn joined_worker<T>(joined: Result<T, JoinError>) -> Option<T> {
    match joined {
        Ok(output) => Some(output),
        Err(e) => {
            tracing::warn!(error = %e, "Reconcile worker lost");
            None
        }
    }
}

fn schedule(timers: &mut JoinSet<ReconcileTarget>, target: ReconcileTarget, delay: Duration) {
    timers.spawn(async move {
        tokio::time::sleep(delay).await;
        target
    });
}

// ============================================================================
// WORK QUEUE
// ============================================================================

/// Per-target scheduling state of the dispatch loop.
#[derive(Debug, Default)]
struct WorkQueue {
    ready: VecDeque<ReconcileTarget>,
    queued: HashSet<ReconcileTarget>,
    in_flight: HashSet<ReconcileTarget>,
    dirty: HashSet<ReconcileTarget>,
    failures: HashMap<ReconcileTarget, u32>,
}

impl WorkQueue {
    /// Queue a target unless it is already queued; mark it dirty if in flight.
    fn enqueue(&mut self, target: ReconcileTarget) {
        if self.in_flight.contains(&target) {
            self.dirty.insert(target);
        } else if self.queued.insert(target.clone()) {
            self.ready.push_back(target);
        }
    }

    /// Pop the next ready target and mark it in flight.
    fn next_ready(&mut self) -> Option<ReconcileTarget> {
        let target = self.ready.pop_front()?;
        self.queued.remove(&target);
        self.in_flight.insert(target.clone());
        Some(target)
    }

    /// Mark a target idle again. Returns whether it was dirtied meanwhile.
    fn finish(&mut self, target: &ReconcileTarget) -> bool {
        self.in_flight.remove(target);
        self.dirty.remove(target)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use vcache_core::ObjectKey;

    #[derive(Debug, Clone)]
    enum QueueOp {
        Enqueue(u8),
        Take,
        Finish(u8),
    }

    fn arb_queue_op() -> impl Strategy<Value = QueueOp> {
        prop_oneof![
            (0u8..4).prop_map(QueueOp::Enqueue),
            Just(QueueOp::Take),
            (0u8..4).prop_map(QueueOp::Finish),
        ]
    }

    fn key(i: u8) -> ReconcileTarget {
        ObjectKey::new("ns", format!("t{}", i))
    }

    /// Finish a running target the way the dispatch loop does.
    fn finish(queue: &mut WorkQueue, target: ReconcileTarget) {
        if queue.finish(&target) {
            queue.enqueue(target);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A target is never handed out again before its invocation
        /// finishes, and every event is eventually followed by a run.
        #[test]
        fn prop_target_never_taken_twice_before_finish(
            ops in prop::collection::vec(arb_queue_op(), 0..60),
        ) {
            let mut queue = WorkQueue::default();
            let mut running: HashSet<ReconcileTarget> = HashSet::new();
            let mut unserved: HashSet<ReconcileTarget> = HashSet::new();

            for op in ops {
                match op {
                    QueueOp::Enqueue(i) => {
                        queue.enqueue(key(i));
                        unserved.insert(key(i));
                    }
                    QueueOp::Take => {
                        if let Some(target) = queue.next_ready() {
                            prop_assert!(running.insert(target.clone()), "{} taken twice", target);
                            unserved.remove(&target);
                        }
                    }
                    QueueOp::Finish(i) => {
                        if running.remove(&key(i)) {
                            finish(&mut queue, key(i));
                        }
                    }
                }
            }

            loop {
                let mut progressed = false;
                while let Some(target) = queue.next_ready() {
                    prop_assert!(running.insert(target.clone()), "{} taken twice", target);
                    unserved.remove(&target);
                    progressed = true;
                }
                let done: Vec<_> = running.drain().collect();
                for target in done {
                    finish(&mut queue, target);
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
            prop_assert!(unserved.is_empty(), "never ran: {:?}", unserved);
        }
    }
}
