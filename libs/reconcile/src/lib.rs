//! Reconciliation of polled device telemetry with operator intents.
//!
//! This library holds the I/O-free core of the fleet monitor:
//!
//! - **Snapshots**: normalized results of one poll for one device.
//! - **Health classification**: a pure, ordered rule set mapping a snapshot
//!   to a [`HealthState`].
//! - **Intents**: operator-issued mode changes that are not yet visible in
//!   telemetry.
//! - **Engine**: merges snapshots and intents into one [`DeviceView`] per
//!   device without flicker.
//!
//! # Invariants
//!
//! - At most one pending intent per device; a new request replaces the old
//! - A pending, unexpired intent is never overridden by a snapshot
//! - Applying the same batch twice yields the same views
//! - Health is always classified from the raw snapshot, intent or not

use std::time::Duration;

use coldwatch_id::DeviceId;
use thiserror::Error;

pub mod engine;
pub mod health;
pub mod intent;
pub mod snapshot;

pub use engine::{DeviceView, EngineConfig, IntentEvent, ModeRequest, ReconcileEngine};
pub use health::{classify, status_label, HealthState, SAFE_TEMPERATURE_RANGE};
pub use intent::{
    DispatchOutcome, IntentOutcome, IntentResolution, IntentTicket, PendingIntent,
};
pub use snapshot::{HistoryEntry, OperatingMode, Snapshot, SnapshotBatch};

/// Reconciliation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The device is not part of the tracked fleet.
    #[error("device not tracked: {0}")]
    UnknownDevice(DeviceId),
}

/// Default intent expiration window.
pub const DEFAULT_INTENT_EXPIRY: Duration = Duration::from_secs(45);
