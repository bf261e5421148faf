//! Pending mode-change intents.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::snapshot::OperatingMode;

/// Identifies one issued intent.
///
/// Tickets increase monotonically per engine, so a dispatcher outcome can be
/// matched against the intent that produced it and dropped if that intent
/// has since been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IntentTicket(u64);

impl IntentTicket {
    /// Creates a ticket from a raw sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the underlying sequence number.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next ticket.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for IntentTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dispatch progress of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOutcome {
    /// Command not yet answered by the remote service.
    InFlight,
    /// Remote service accepted the command; the device has not switched yet.
    Acknowledged,
    /// All dispatch attempts failed.
    Failed,
}

/// Terminal dispatcher result reported back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acknowledged,
    Failed,
}

/// An issued, not-yet-confirmed mode change for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub ticket: IntentTicket,
    pub target_mode: OperatingMode,
    pub issued_at: Instant,
    pub outcome: IntentOutcome,
}

impl PendingIntent {
    /// Create a new in-flight intent.
    pub fn new(ticket: IntentTicket, target_mode: OperatingMode, issued_at: Instant) -> Self {
        Self {
            ticket,
            target_mode,
            issued_at,
            outcome: IntentOutcome::InFlight,
        }
    }

    /// Time elapsed since the intent was issued.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Returns true once the intent is strictly older than `window`.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.age(now) > window
    }

    /// Decide what an observation means for this intent.
    pub fn resolve(
        &self,
        observed: Option<OperatingMode>,
        now: Instant,
        window: Duration,
    ) -> IntentResolution {
        if observed == Some(self.target_mode) {
            IntentResolution::Confirmed
        } else if self.is_expired(now, window) {
            IntentResolution::Expired
        } else {
            IntentResolution::Pending
        }
    }
}

/// Result of checking a pending intent against an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentResolution {
    /// Device reports the target mode.
    Confirmed,

    /// Still inside the expiration window; keep the optimistic value.
    Pending,

    /// Never confirmed within the window; fall back to observed truth.
    Expired,
}
