//! Async driver for the lifecycle observer.
//!
//! Feeds registration events and grace-timer expiries into one
//! [`WorkerMachine`] per announced worker and carries out the effects.

use hashbrown::HashMap;
use std::future::Future;
use std::sync::Arc;
use swkit_common::{ObserverConfig, SwKitError};
use swkit_sw::{
    Console, RegistrationEvent, ServiceWorkerContainer, ServiceWorkerHandle, ServiceWorkerId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::machine::{LifecycleEffect, LifecycleInput, WorkerMachine};
use crate::message::LifecycleMessage;

/// What the observer saw, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverReport {
    /// A controller existed when the observer started.
    pub controlled: bool,
    /// A registration existed when the observer started.
    pub registration_found: bool,
    /// Workers announced by `updatefound`.
    pub workers_seen: usize,
    /// Every message written to the console, in order.
    pub messages: Vec<LifecycleMessage>,
}

struct TrackedWorker {
    worker: ServiceWorkerHandle,
    machine: WorkerMachine,
    timer: Option<JoinHandle<()>>,
}

impl TrackedWorker {
    /// Redundant with no grace check left to run; nothing more can be logged.
    fn is_retired(&self) -> bool {
        self.timer.is_none() && self.worker.state().is_terminal()
    }
}

/// Watches the page's registration and narrates its lifecycle.
pub struct LifecycleObserver {
    container: Arc<dyn ServiceWorkerContainer>,
    console: Arc<dyn Console>,
    config: ObserverConfig,
}

impl LifecycleObserver {
    pub fn new(
        container: Arc<dyn ServiceWorkerContainer>,
        console: Arc<dyn Console>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            container,
            console,
            config,
        }
    }

    /// Observe until the registration's event stream closes and no grace
    /// check is pending. Returns immediately after the control message if
    /// there is no registration.
    pub async fn run(self) -> ObserverReport {
        let (ready, _) = watch::channel(false);
        self.run_until(std::future::pending(), ready).await
    }

    /// Run on a background task. Stop it with [`ObserverHandle::shutdown`]
    /// or by dropping the handle.
    pub fn spawn(self) -> ObserverHandle {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = watch::channel(false);

        let stopped = async move {
            let _ = stop_rx.await;
        };
        let task = tokio::spawn(self.run_until(stopped, ready_tx));

        ObserverHandle {
            stop: Some(stop_tx),
            ready: ready_rx,
            task,
        }
    }

    async fn run_until<S>(self, shutdown: S, ready: watch::Sender<bool>) -> ObserverReport
    where
        S: Future<Output = ()>,
    {
        let mut report = ObserverReport::default();

        report.controlled = self.container.controller().await.is_some();
        let control = if report.controlled {
            LifecycleMessage::Controlled
        } else {
            LifecycleMessage::NotControlled
        };
        self.emit(&mut report, control);

        let Some(registration) = self.container.get_registration().await else {
            debug!("No service worker registration; nothing to observe");
            return report;
        };
        report.registration_found = true;

        // Subscribe before looking at `waiting` so no update slips between.
        let mut events = registration.subscribe().await;
        if registration.waiting().await.is_some() {
            self.emit(&mut report, LifecycleMessage::Waiting);
        }
        info!(scope = %registration.scope(), "Observing service worker registration");
        ready.send_replace(true);

        let (grace_tx, mut grace_rx) = mpsc::unbounded_channel::<ServiceWorkerId>();
        let mut tracked: HashMap<ServiceWorkerId, TrackedWorker> = HashMap::new();
        let mut events_open = true;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    debug!("Observer shutdown requested");
                    break;
                }

                Some(id) = grace_rx.recv() => {
                    if let Some(entry) = tracked.get_mut(&id) {
                        entry.timer = None;
                        let state = entry.worker.state();
                        debug!(worker = %id, %state, "Grace period elapsed");
                        let effects = entry.machine.handle(LifecycleInput::GraceElapsed(state));
                        self.apply(&mut report, id, entry, effects, &grace_tx);
                    }
                    Self::retire(&mut tracked, id);
                }

                event = events.recv(), if events_open => match event {
                    Some(RegistrationEvent::UpdateFound { worker }) => {
                        let id = worker.id();
                        let entry = tracked.entry(id).or_insert_with(|| {
                            report.workers_seen += 1;
                            TrackedWorker {
                                worker,
                                machine: WorkerMachine::new(),
                                timer: None,
                            }
                        });
                        let effects = entry.machine.handle(LifecycleInput::Discovered);
                        self.apply(&mut report, id, entry, effects, &grace_tx);
                    }
                    Some(RegistrationEvent::StateChange { worker_id, state }) => {
                        if let Some(entry) = tracked.get_mut(&worker_id) {
                            let effects = entry.machine.handle(LifecycleInput::StateChanged(state));
                            self.apply(&mut report, worker_id, entry, effects, &grace_tx);
                        }
                        Self::retire(&mut tracked, worker_id);
                    }
                    None => {
                        debug!("Registration event stream closed");
                        events_open = false;
                    }
                },
            }

            if !events_open && tracked.values().all(|t| t.timer.is_none()) {
                break;
            }
        }

        for (id, entry) in tracked.iter_mut() {
            if let Some(timer) = entry.timer.take() {
                debug!(worker = %id, "Cancelling grace timer");
                timer.abort();
            }
        }

        report
    }

    fn apply(
        &self,
        report: &mut ObserverReport,
        id: ServiceWorkerId,
        entry: &mut TrackedWorker,
        effects: Vec<LifecycleEffect>,
        grace_tx: &mpsc::UnboundedSender<ServiceWorkerId>,
    ) {
        for effect in effects {
            match effect {
                LifecycleEffect::Log(message) => self.emit(report, message),
                LifecycleEffect::StartGraceTimer => {
                    let delay = self.config.grace_period();
                    let grace_tx = grace_tx.clone();
                    debug!(worker = %id, ?delay, "Starting grace timer");
                    entry.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = grace_tx.send(id);
                    }));
                }
            }
        }
    }

    fn retire(tracked: &mut HashMap<ServiceWorkerId, TrackedWorker>, id: ServiceWorkerId) {
        if tracked.get(&id).is_some_and(TrackedWorker::is_retired) {
            debug!(worker = %id, "Worker retired");
            tracked.remove(&id);
        }
    }

    fn emit(&self, report: &mut ObserverReport, message: LifecycleMessage) {
        debug!(?message, "Lifecycle message");
        self.console.log(message.as_str());
        report.messages.push(message);
    }
}

/// Handle to an observer running on a background task.
pub struct ObserverHandle {
    stop: Option<oneshot::Sender<()>>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<ObserverReport>,
}

impl ObserverHandle {
    /// Resolves once the observer is subscribed to the registration, or has
    /// finished because there is none.
    pub async fn ready(&mut self) {
        let _ = self.ready.wait_for(|ready| *ready).await;
    }

    /// Whether the observer task has finished on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop observing, cancel pending grace timers and return the report.
    pub async fn shutdown(mut self) -> swkit_common::Result<ObserverReport> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join().await
    }

    /// Wait for the observer to finish on its own.
    pub async fn join(self) -> swkit_common::Result<ObserverReport> {
        self.task.await.map_err(|e| {
            warn!(error = %e, "Observer task did not complete");
            if e.is_cancelled() {
                SwKitError::Cancelled
            } else {
                SwKitError::internal(format!("observer task panicked: {e}"))
            }
        })
    }
}
