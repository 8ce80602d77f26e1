//! # Controller
//!
//! Turns store changes and requeue decisions into reconcile passes.
//!
//! ## Work queue
//!
//! Every trigger resolves to the key of a `Heat` instance and lands on one
//! queue. The dispatcher guarantees that at most one pass per instance runs at
//! a time: a trigger for an instance with a pass in flight marks it dirty, and
//! the pass re-queues it on completion instead of scheduling its own requeue.
//! The dirty mark lives on the in-flight entry, so a trigger racing the end of
//! a pass either marks that pass or starts the next one.
//! Distinct instances run in parallel up to `max_concurrent_reconciles`.
//!
//! ## Triggers
//!
//! - `Heat` objects trigger themselves
//! - owned artifacts and collaborator requests trigger their owner
//! - secrets trigger every instance that reads them
//! - identity service changes trigger every instance in the namespace
//! - timed requeues from the [`RequeuePolicy`](super::requeue::RequeuePolicy)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{HeatInstance, ObjectKey, ObjectKind};
use crate::orchestration::reconciler::HeatReconciler;
use crate::orchestration::requeue::RequeueDecision;
use crate::store::{ObjectStore, WatchEvent};

/// Counters exposed for health checks and tests
#[derive(Debug, Default)]
pub struct ControllerStats {
    passes: AtomicU64,
    failed_passes: AtomicU64,
    coalesced_triggers: AtomicU64,
}

impl ControllerStats {
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn failed_passes(&self) -> u64 {
        self.failed_passes.load(Ordering::Relaxed)
    }

    /// Triggers folded into an already running pass
    pub fn coalesced_triggers(&self) -> u64 {
        self.coalesced_triggers.load(Ordering::Relaxed)
    }
}

/// Watch-driven work queue in front of a [`HeatReconciler`]
pub struct Controller {
    reconciler: Arc<HeatReconciler>,
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    semaphore: Arc<Semaphore>,
    /// Instances with a pass running, mapped to whether a trigger arrived since it started
    in_flight: DashMap<ObjectKey, bool>,
    /// Earliest pending timed requeue per instance
    scheduled: DashMap<ObjectKey, Instant>,
    queue_tx: mpsc::UnboundedSender<ObjectKey>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<ObjectKey>>>,
    shutdown_notify: Notify,
    stats: ControllerStats,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Controller {
    pub fn new(reconciler: Arc<HeatReconciler>, config: ControllerConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let store = reconciler.collaborators().store.clone();
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_reconciles.max(1))),
            reconciler,
            store,
            config,
            in_flight: DashMap::new(),
            scheduled: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown_notify: Notify::new(),
            stats: ControllerStats::default(),
        })
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn reconciler(&self) -> &HeatReconciler {
        &self.reconciler
    }

    /// Ask a running [`Controller::run`] to stop after in-flight passes finish
    pub fn shutdown(&self) {
        // notify_one keeps a permit if the loop is between selects
        self.shutdown_notify.notify_one();
    }

    /// Queue a pass for `key`
    pub fn enqueue(&self, key: ObjectKey) {
        if self.queue_tx.send(key).is_err() {
            debug!("Work queue closed, dropping trigger");
        }
    }

    /// Process triggers until [`Controller::shutdown`] is called
    pub async fn run(self: Arc<Self>) -> ReconcileResult<()> {
        let mut queue = self.queue_rx.lock().await.take().ok_or_else(|| {
            ReconcileError::Configuration("controller is already running".to_string())
        })?;
        let mut events = self.store.watch();

        info!(
            max_concurrent_reconciles = self.config.max_concurrent_reconciles,
            watch_namespace = ?self.config.watch_namespace,
            "🚀 CONTROLLER: Starting"
        );
        self.resync().await?;

        loop {
            tokio::select! {
                _ = self.shutdown_notify.notified() => {
                    info!("🛑 CONTROLLER: Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        for key in self.instances_for(&event).await {
                            self.enqueue(key);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch stream lagged, resyncing all instances");
                        self.resync().await?;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Watch stream closed, stopping controller");
                        break;
                    }
                },
                Some(key) = queue.recv() => self.clone().dispatch(key),
            }
        }

        // Every permit back means no pass is running
        let permits = self.config.max_concurrent_reconciles.max(1) as u32;
        let _drained = self.semaphore.acquire_many(permits).await;
        info!(passes = self.stats.passes(), "✅ CONTROLLER: Stopped");
        Ok(())
    }

    /// Queue every instance in scope
    async fn resync(&self) -> ReconcileResult<()> {
        let namespace = self.config.watch_namespace.as_deref();
        for object in self.store.list(ObjectKind::Heat, namespace).await? {
            self.enqueue(object.key().clone());
        }
        Ok(())
    }

    fn in_scope(&self, key: &ObjectKey) -> bool {
        self.config
            .watch_namespace
            .as_ref()
            .map_or(true, |ns| *ns == key.namespace)
    }

    /// Instances affected by a store change
    pub async fn instances_for(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        let object = &event.object;
        if !self.in_scope(object.key()) {
            return Vec::new();
        }

        match object.kind {
            ObjectKind::Heat => vec![object.key().clone()],
            ObjectKind::ConfigMap
            | ObjectKind::Job
            | ObjectKind::Deployment
            | ObjectKind::TransportUrl
            | ObjectKind::MariaDbDatabase => object.metadata.owner.iter().cloned().collect(),
            ObjectKind::Secret => {
                let secret = &object.key().name;
                self.instances_in(&object.key().namespace)
                    .await
                    .into_iter()
                    .filter(|instance| {
                        instance.spec.secret == *secret
                            || instance.status.transport_url_secret == *secret
                    })
                    .map(|instance| instance.metadata.key)
                    .collect()
            }
            ObjectKind::KeystoneApi => self
                .instances_in(&object.key().namespace)
                .await
                .into_iter()
                .map(|instance| instance.metadata.key)
                .collect(),
        }
    }

    async fn instances_in(&self, namespace: &str) -> Vec<HeatInstance> {
        match self.store.list(ObjectKind::Heat, Some(namespace)).await {
            Ok(objects) => objects
                .iter()
                .filter_map(|object| HeatInstance::from_object(object).ok())
                .collect(),
            Err(e) => {
                warn!(namespace, error = %e, "Failed to list instances for trigger mapping");
                Vec::new()
            }
        }
    }

    /// Claim `key` for a new pass; a pass already in flight is marked dirty instead
    fn begin_pass(&self, key: &ObjectKey) -> bool {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(mut running) => {
                *running.get_mut() = true;
                self.stats.coalesced_triggers.fetch_add(1, Ordering::Relaxed);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
                true
            }
        }
    }

    /// Release `key`; true when a trigger arrived while the pass ran
    fn finish_pass(&self, key: &ObjectKey) -> bool {
        self.in_flight
            .remove(key)
            .map_or(false, |(_, dirty)| dirty)
    }

    fn dispatch(self: Arc<Self>, key: ObjectKey) {
        if !self.begin_pass(&key) {
            return;
        }

        tokio::spawn(async move {
            let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
                self.finish_pass(&key);
                return;
            };

            let decision = match self.reconciler.reconcile(&key).await {
                Ok(report) => report.requeue,
                Err(e) => {
                    self.stats.failed_passes.fetch_add(1, Ordering::Relaxed);
                    self.reconciler.requeue_after_error(&key, &e)
                }
            };
            self.stats.passes.fetch_add(1, Ordering::Relaxed);

            if self.finish_pass(&key) {
                self.enqueue(key);
            } else {
                self.schedule(key, decision);
            }
        });
    }

    fn schedule(self: &Arc<Self>, key: ObjectKey, decision: RequeueDecision) {
        let delay = match decision {
            RequeueDecision::None => return,
            RequeueDecision::Immediate => {
                self.enqueue(key);
                return;
            }
            RequeueDecision::After(delay) => delay,
        };

        let deadline = Instant::now() + delay;
        {
            let mut entry = self.scheduled.entry(key.clone()).or_insert(deadline);
            if *entry < deadline {
                return;
            }
            *entry = deadline;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let fire = this
                .scheduled
                .remove_if(&key, |_, pending| *pending == deadline)
                .is_some();
            if fire {
                this.enqueue(key);
            }
        });
    }
}
