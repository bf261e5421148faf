//! The reconciliation engine.
//!
//! Owns one [`DeviceView`] per tracked device and decides, on every poll
//! batch and every intent transition, which value is authoritative: the
//! polled snapshot or the operator's pending intent.
//!
//! The pending-intent check is the single gate. While an intent for a device
//! is pending and unexpired, no snapshot can move that device's display mode
//! away from the intent's target; the device only leaves the transitioning
//! state when a snapshot reports the target mode, when the intent expires,
//! or when the dispatcher reports terminal failure. A failed fetch never
//! clears an intent.
//!
//! The engine is synchronous and performs no I/O. Callers pass the current
//! time explicitly, which keeps every transition deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use coldwatch_id::DeviceId;
use serde::Serialize;

use crate::health::{classify, status_label, HealthState};
use crate::intent::{
    DispatchOutcome, IntentOutcome, IntentResolution, IntentTicket, PendingIntent,
};
use crate::snapshot::{OperatingMode, Snapshot, SnapshotBatch};
use crate::{ReconcileError, DEFAULT_INTENT_EXPIRY};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an unconfirmed intent may hold the optimistic display mode.
    pub expiration_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiration_window: DEFAULT_INTENT_EXPIRY,
        }
    }
}

/// The reconciled per-device view handed to presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub id: DeviceId,
    pub health_state: HealthState,
    pub status_label: String,
    pub display_temperature: Option<f64>,
    pub display_battery: Option<f64>,
    pub display_mode: OperatingMode,
    pub is_mode_transitioning: bool,
    pub recommendation: Option<String>,

    /// Free-form status from the server (e.g. `CRITICO`), shown as reported.
    pub server_status: Option<String>,

    /// Server colour hint paired with `server_status`.
    pub indicator: Option<String>,

    /// Time of the last successful poll for this device.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Intent lifecycle transitions reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentEvent {
    /// The device reported the requested mode.
    Confirmed {
        device_id: DeviceId,
        ticket: IntentTicket,
        mode: OperatingMode,
    },

    /// The intent outlived the expiration window without confirmation.
    Expired {
        device_id: DeviceId,
        ticket: IntentTicket,
        target_mode: OperatingMode,
        fallback_mode: OperatingMode,
    },

    /// The dispatcher gave up; the optimistic value was reverted.
    DispatchFailed {
        device_id: DeviceId,
        ticket: IntentTicket,
        target_mode: OperatingMode,
        reverted_to: OperatingMode,
    },
}

impl IntentEvent {
    /// Device the event concerns.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            IntentEvent::Confirmed { device_id, .. }
            | IntentEvent::Expired { device_id, .. }
            | IntentEvent::DispatchFailed { device_id, .. } => device_id,
        }
    }
}

/// Result of registering a new mode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRequest {
    /// Ticket to report the dispatcher outcome against.
    pub ticket: IntentTicket,

    /// Intent that this request replaced, if any.
    pub superseded: Option<IntentTicket>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    snapshot: Option<Snapshot>,
    last_seen: Option<DateTime<Utc>>,

    /// Last mode the device itself reported.
    observed_mode: OperatingMode,

    pending: Option<PendingIntent>,
    view: DeviceView,
}

impl DeviceState {
    fn new(id: DeviceId) -> Self {
        let mut state = Self {
            snapshot: None,
            last_seen: None,
            observed_mode: OperatingMode::default(),
            pending: None,
            view: DeviceView {
                id,
                health_state: HealthState::Awaiting,
                status_label: String::new(),
                display_temperature: None,
                display_battery: None,
                display_mode: OperatingMode::default(),
                is_mode_transitioning: false,
                recommendation: None,
                server_status: None,
                indicator: None,
                last_seen: None,
            },
        };
        state.refresh_view();
        state
    }

    /// Recompute the view from the current snapshot and intent.
    fn refresh_view(&mut self) {
        let view = &mut self.view;

        match &self.snapshot {
            Some(snapshot) => {
                let health = classify(snapshot);
                let show_readings = !health.hides_readings();
                view.health_state = health;
                view.status_label = status_label(health, snapshot.health_score);
                view.display_temperature = snapshot.temperature.filter(|_| show_readings);
                view.display_battery = snapshot.battery.filter(|_| show_readings);
                view.recommendation = snapshot.recommendation.clone().filter(|_| show_readings);
                view.server_status = snapshot.operational_status.clone();
                view.indicator = snapshot.indicator.clone();
            }
            None => {
                view.health_state = HealthState::Awaiting;
                view.status_label = status_label(HealthState::Awaiting, None);
                view.display_temperature = None;
                view.display_battery = None;
                view.recommendation = None;
                view.server_status = None;
                view.indicator = None;
            }
        }

        match &self.pending {
            Some(intent) => {
                view.display_mode = intent.target_mode;
                view.is_mode_transitioning = true;
            }
            None => {
                view.display_mode = self.observed_mode;
                view.is_mode_transitioning = false;
            }
        }

        view.last_seen = self.last_seen;
    }
}

/// Merges polled snapshots with locally issued intents.
#[derive(Debug, Clone)]
pub struct ReconcileEngine {
    config: EngineConfig,

    /// Fleet order for iteration.
    order: Vec<DeviceId>,

    devices: HashMap<DeviceId, DeviceState>,

    last_ticket: IntentTicket,
}

impl ReconcileEngine {
    /// Create an engine tracking `fleet`. Duplicate IDs are ignored.
    pub fn new(fleet: impl IntoIterator<Item = DeviceId>, config: EngineConfig) -> Self {
        let mut order = Vec::new();
        let mut devices = HashMap::new();

        for id in fleet {
            if devices.contains_key(&id) {
                continue;
            }
            devices.insert(id.clone(), DeviceState::new(id.clone()));
            order.push(id);
        }

        Self {
            config,
            order,
            devices,
            last_ticket: IntentTicket::new(0),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tracked devices in fleet order.
    pub fn fleet(&self) -> &[DeviceId] {
        &self.order
    }

    /// Current view of one device.
    pub fn view(&self, id: &DeviceId) -> Option<&DeviceView> {
        self.devices.get(id).map(|d| &d.view)
    }

    /// Current views of all devices, in fleet order.
    pub fn views(&self) -> Vec<DeviceView> {
        self.order
            .iter()
            .filter_map(|id| self.view(id).cloned())
            .collect()
    }

    /// The pending intent for a device, if any.
    pub fn pending_intent(&self, id: &DeviceId) -> Option<&PendingIntent> {
        self.devices.get(id).and_then(|d| d.pending.as_ref())
    }

    /// Number of devices with a pending intent.
    pub fn pending_count(&self) -> usize {
        self.devices.values().filter(|d| d.pending.is_some()).count()
    }

    fn device_mut(&mut self, id: &DeviceId) -> Result<&mut DeviceState, ReconcileError> {
        self.devices
            .get_mut(id)
            .ok_or_else(|| ReconcileError::UnknownDevice(id.clone()))
    }

    /// Register an operator request to switch a device's mode.
    ///
    /// Any existing intent for the device is replaced, and the view shows the
    /// target mode immediately.
    pub fn request_mode_change(
        &mut self,
        id: &DeviceId,
        target_mode: OperatingMode,
        now: Instant,
    ) -> Result<ModeRequest, ReconcileError> {
        let ticket = self.last_ticket.next();
        let device = self.device_mut(id)?;

        let superseded = device
            .pending
            .replace(PendingIntent::new(ticket, target_mode, now))
            .map(|previous| previous.ticket);
        device.refresh_view();

        self.last_ticket = ticket;
        Ok(ModeRequest { ticket, superseded })
    }

    /// Record the dispatcher's terminal result for an intent.
    ///
    /// Outcomes for intents that are no longer pending (confirmed, expired,
    /// or superseded) are ignored and return `Ok(None)`.
    pub fn apply_dispatch_outcome(
        &mut self,
        id: &DeviceId,
        ticket: IntentTicket,
        outcome: DispatchOutcome,
    ) -> Result<Option<IntentEvent>, ReconcileError> {
        let device = self.device_mut(id)?;

        let Some(intent) = device.pending.as_mut().filter(|p| p.ticket == ticket) else {
            return Ok(None);
        };

        match outcome {
            DispatchOutcome::Acknowledged => {
                intent.outcome = IntentOutcome::Acknowledged;
                Ok(None)
            }
            DispatchOutcome::Failed => {
                intent.outcome = IntentOutcome::Failed;
                let target_mode = intent.target_mode;
                device.pending = None;
                device.refresh_view();

                Ok(Some(IntentEvent::DispatchFailed {
                    device_id: id.clone(),
                    ticket,
                    target_mode,
                    reverted_to: device.observed_mode,
                }))
            }
        }
    }

    /// Apply one poll cycle's snapshots.
    ///
    /// Devices not in the fleet are ignored; fleet devices absent from the
    /// batch keep their current view.
    pub fn apply_batch(&mut self, batch: &SnapshotBatch, now: Instant) -> Vec<IntentEvent> {
        let window = self.config.expiration_window;
        let mut events = Vec::new();

        for (id, snapshot) in &batch.snapshots {
            let Some(device) = self.devices.get_mut(id) else {
                continue;
            };

            let observed = snapshot.observed_mode();
            if !snapshot.fetch_failed {
                device.last_seen = Some(batch.fetched_at);
                if let Some(mode) = observed {
                    device.observed_mode = mode;
                }
            }

            if let Some(intent) = &device.pending {
                match intent.resolve(observed, now, window) {
                    IntentResolution::Confirmed => {
                        events.push(IntentEvent::Confirmed {
                            device_id: id.clone(),
                            ticket: intent.ticket,
                            mode: intent.target_mode,
                        });
                        device.pending = None;
                    }
                    IntentResolution::Expired => {
                        events.push(IntentEvent::Expired {
                            device_id: id.clone(),
                            ticket: intent.ticket,
                            target_mode: intent.target_mode,
                            fallback_mode: device.observed_mode,
                        });
                        device.pending = None;
                    }
                    IntentResolution::Pending => {}
                }
            }

            device.snapshot = Some(snapshot.clone());
            device.refresh_view();
        }

        events
    }
}
