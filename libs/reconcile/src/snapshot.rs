//! Telemetry snapshots as seen by the reconciler.
//!
//! A snapshot is the result of one poll for one device. Wire decoding lives
//! in the monitor service; this module only holds the normalized model.

use chrono::{DateTime, Utc};
use coldwatch_id::DeviceId;
use serde::{Deserialize, Serialize};

/// Telemetry operating mode of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Low-frequency telemetry (the device's resting mode).
    #[default]
    Eco,
    /// High-frequency "live" telemetry.
    Live,
}

impl OperatingMode {
    /// Parse a history mode tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if ["LIVE", "MANUTENCAO", "TEMPO_REAL"]
            .iter()
            .any(|t| tag.eq_ignore_ascii_case(t))
        {
            Some(Self::Live)
        } else if ["ECO", "ECONOMIA", "NORMAL"]
            .iter()
            .any(|t| tag.eq_ignore_ascii_case(t))
        {
            Some(Self::Eco)
        } else {
            None
        }
    }

    /// Returns true for live mode.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl From<bool> for OperatingMode {
    fn from(live: bool) -> Self {
        if live {
            Self::Live
        } else {
            Self::Eco
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Eco => write!(f, "eco"),
            OperatingMode::Live => write!(f, "live"),
        }
    }
}

/// One past reading from a device's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: Option<DateTime<Utc>>,
    pub temperature: Option<f64>,
    pub lid_open: bool,
    /// Raw operating-mode tag as reported by the server.
    pub mode: Option<String>,
}

/// Result of one poll for one device.
///
/// When `fetch_failed` is set every other field is meaningless and must be
/// read as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server-computed health score (0-100); `None` when not yet computable.
    pub health_score: Option<u8>,

    /// Server-provided status label, authoritative when present.
    pub operational_status: Option<String>,

    pub temperature: Option<f64>,
    pub tampered: bool,
    pub lid_open: bool,

    /// Battery charge in percent; absent for mains-powered units.
    pub battery: Option<f64>,

    /// Server advice for the operator.
    pub recommendation: Option<String>,

    /// Server indicator colour hint.
    pub indicator: Option<String>,

    pub history: Vec<HistoryEntry>,

    pub fetch_failed: bool,
}

impl Snapshot {
    /// A snapshot for a poll that did not complete.
    pub fn failed() -> Self {
        Self {
            fetch_failed: true,
            ..Self::default()
        }
    }

    /// The most recent history entry.
    ///
    /// The entry with the latest timestamp wins. When no entry carries a
    /// timestamp the sequence order is trusted and the last entry is used.
    pub fn latest_entry(&self) -> Option<&HistoryEntry> {
        let timed = self
            .history
            .iter()
            .filter(|e| e.time.is_some())
            .max_by_key(|e| e.time);
        timed.or_else(|| self.history.last())
    }

    /// Operating mode the device reports, read from its latest history entry.
    pub fn observed_mode(&self) -> Option<OperatingMode> {
        if self.fetch_failed {
            return None;
        }
        self.latest_entry()
            .and_then(|e| e.mode.as_deref())
            .and_then(OperatingMode::from_tag)
    }
}

/// Snapshots for one poll cycle, applied to the engine atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBatch {
    /// Wall-clock time the cycle completed.
    pub fetched_at: DateTime<Utc>,

    /// One snapshot per polled device, in fleet order.
    pub snapshots: Vec<(DeviceId, Snapshot)>,
}

impl SnapshotBatch {
    /// Create a batch stamped with the current time.
    pub fn new(snapshots: Vec<(DeviceId, Snapshot)>) -> Self {
        Self {
            fetched_at: Utc::now(),
            snapshots,
        }
    }

    /// Number of devices whose fetch failed in this cycle.
    pub fn failed_count(&self) -> usize {
        self.snapshots.iter().filter(|(_, s)| s.fetch_failed).count()
    }
}
