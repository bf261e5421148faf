//! Fleet monitor event loop.
//!
//! A single task owns the [`ReconcileEngine`]. Poll batches, operator
//! requests, and dispatcher outcomes all reach it as [`Event`]s on one
//! channel, so engine transitions are serialized without locks. Views are
//! published on a `watch` channel after every transition; intent events are
//! broadcast as [`Notification`]s.

use std::time::Duration;

use coldwatch_id::DeviceId;
use coldwatch_reconcile::{
    DeviceView, DispatchOutcome, IntentEvent, IntentTicket, ModeRequest, OperatingMode,
    ReconcileEngine, ReconcileError, SnapshotBatch,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{outcome_of, Dispatcher};
use crate::poller::Poller;
use crate::scheduler::{every, ScheduleHandle};

const NOTIFICATION_CAPACITY: usize = 64;

/// Errors returned through a [`FleetHandle`].
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("fleet monitor has stopped")]
    Stopped,
}

/// User-facing notices emitted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// An intent was confirmed, expired, or reverted.
    Intent(IntentEvent),

    /// A mode request named a device outside the fleet.
    UnknownDevice(DeviceId),
}

enum Event {
    Batch(SnapshotBatch),
    ModeRequest {
        device_id: DeviceId,
        target: OperatingMode,
        reply: oneshot::Sender<Result<ModeRequest, ReconcileError>>,
    },
    DispatchResult {
        device_id: DeviceId,
        ticket: IntentTicket,
        outcome: DispatchOutcome,
    },
    Refresh,
}

/// Cloneable handle for talking to a running monitor.
#[derive(Clone)]
pub struct FleetHandle {
    events: mpsc::UnboundedSender<Event>,
    views: watch::Receiver<Vec<DeviceView>>,
    notifications: broadcast::Sender<Notification>,
}

impl FleetHandle {
    /// Latest views, in fleet order.
    pub fn views(&self) -> Vec<DeviceView> {
        self.views.borrow().clone()
    }

    pub fn view(&self, id: &DeviceId) -> Option<DeviceView> {
        self.views.borrow().iter().find(|v| &v.id == id).cloned()
    }

    /// Receiver that wakes whenever the views change.
    pub fn watch_views(&self) -> watch::Receiver<Vec<DeviceView>> {
        self.views.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Ask for a mode change.
    ///
    /// Resolves once the engine has recorded the intent; the view already
    /// shows the target mode when this returns. Delivery to the device
    /// continues in the background.
    pub async fn request_mode_change(
        &self,
        device_id: DeviceId,
        target: OperatingMode,
    ) -> Result<ModeRequest, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::ModeRequest {
                device_id,
                target,
                reply,
            })
            .map_err(|_| MonitorError::Stopped)?;

        Ok(rx.await.map_err(|_| MonitorError::Stopped)??)
    }

    /// Poll now instead of waiting for the next cycle.
    pub fn refresh(&self) -> Result<(), MonitorError> {
        self.events
            .send(Event::Refresh)
            .map_err(|_| MonitorError::Stopped)
    }
}

/// Wires the poller and dispatcher to a reconciliation engine.
pub struct FleetMonitor {
    engine: ReconcileEngine,
    poller: Poller,
    dispatcher: Dispatcher,
    poll_interval: Duration,
}

impl FleetMonitor {
    pub fn new(
        engine: ReconcileEngine,
        poller: Poller,
        dispatcher: Dispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            poller,
            dispatcher,
            poll_interval,
        }
    }

    /// Start polling and the event loop.
    ///
    /// The loop runs until `shutdown` flips to true or its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> (FleetHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (views_tx, views_rx) = watch::channel(self.engine.views());
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let schedule = {
            let poller = self.poller.clone();
            let events = events_tx.clone();
            every(self.poll_interval, move || {
                let poller = poller.clone();
                let events = events.clone();
                async move {
                    let batch = poller.poll_once().await;
                    let _ = events.send(Event::Batch(batch));
                }
            })
        };

        let handle = FleetHandle {
            events: events_tx.clone(),
            views: views_rx,
            notifications: notify_tx.clone(),
        };

        let event_loop = EventLoop {
            engine: self.engine,
            dispatcher: self.dispatcher,
            events: events_tx,
            views: views_tx,
            notifications: notify_tx,
            schedule,
        };

        info!(
            devices = event_loop.engine.fleet().len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            intent_expiry_secs = event_loop.engine.config().expiration_window.as_secs(),
            "Starting fleet monitor"
        );

        let task = tokio::spawn(event_loop.run(events_rx, shutdown));
        (handle, task)
    }
}

struct EventLoop {
    engine: ReconcileEngine,
    dispatcher: Dispatcher,
    events: mpsc::UnboundedSender<Event>,
    views: watch::Sender<Vec<DeviceView>>,
    notifications: broadcast::Sender<Notification>,
    schedule: ScheduleHandle,
}

impl EventLoop {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle(event),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Fleet monitor shutting down");
                        break;
                    }
                }
            }
        }

        self.schedule.shutdown().await;
    }

    fn now() -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Batch(batch) => {
                let events = self.engine.apply_batch(&batch, Self::now());
                debug!(
                    devices = batch.snapshots.len(),
                    failed = batch.failed_count(),
                    pending = self.engine.pending_count(),
                    "Applied snapshot batch"
                );
                self.publish();
                for event in events {
                    self.notify(event);
                }
            }
            Event::ModeRequest {
                device_id,
                target,
                reply,
            } => {
                let result = self
                    .engine
                    .request_mode_change(&device_id, target, Self::now());

                match &result {
                    Ok(request) => {
                        info!(
                            device_id = %device_id,
                            mode = %target,
                            ticket = %request.ticket,
                            superseded = ?request.superseded.map(|t| t.value()),
                            "Mode change requested"
                        );
                        self.publish();
                        self.spawn_dispatch(device_id, target, request.ticket);
                    }
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "Mode change rejected");
                        let _ = self
                            .notifications
                            .send(Notification::UnknownDevice(device_id));
                    }
                }

                let _ = reply.send(result);
            }
            Event::DispatchResult {
                device_id,
                ticket,
                outcome,
            } => match self
                .engine
                .apply_dispatch_outcome(&device_id, ticket, outcome)
            {
                Ok(Some(event)) => {
                    self.publish();
                    self.notify(event);
                }
                Ok(None) => {
                    debug!(device_id = %device_id, ticket = %ticket, ?outcome, "Dispatch outcome recorded");
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Dispatch outcome for unknown device");
                }
            },
            Event::Refresh => {
                debug!("Manual refresh requested");
                self.schedule.trigger_now();
            }
        }
    }

    fn spawn_dispatch(&self, device_id: DeviceId, target: OperatingMode, ticket: IntentTicket) {
        let dispatcher = self.dispatcher.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&device_id, target).await;
            let _ = events.send(Event::DispatchResult {
                device_id,
                ticket,
                outcome: outcome_of(&result),
            });
        });
    }

    fn publish(&self) {
        self.views.send_replace(self.engine.views());
    }

    fn notify(&self, event: IntentEvent) {
        match &event {
            IntentEvent::Confirmed {
                device_id,
                ticket,
                mode,
            } => {
                info!(device_id = %device_id, ticket = %ticket, mode = %mode, "Mode change confirmed");
            }
            IntentEvent::Expired {
                device_id,
                ticket,
                target_mode,
                fallback_mode,
            } => {
                info!(
                    device_id = %device_id,
                    ticket = %ticket,
                    target_mode = %target_mode,
                    fallback_mode = %fallback_mode,
                    "Mode change not confirmed in time"
                );
            }
            IntentEvent::DispatchFailed {
                device_id,
                ticket,
                target_mode,
                reverted_to,
            } => {
                warn!(
                    device_id = %device_id,
                    ticket = %ticket,
                    target_mode = %target_mode,
                    reverted_to = %reverted_to,
                    "Mode command could not be delivered"
                );
            }
        }

        // No subscribers is fine.
        let _ = self.notifications.send(Notification::Intent(event));
    }
}
