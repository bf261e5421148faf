//! Health classification of a single snapshot.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. fetch failed, or server status `OFFLINE` → [`HealthState::Offline`]
//! 2. server status `AWAITING`/`AGUARDANDO`, or no score → [`HealthState::Awaiting`]
//! 3. score of zero → [`HealthState::Fraud`]
//! 4. tamper or lid-open flag → [`HealthState::Violation`]
//! 5. temperature outside [`SAFE_TEMPERATURE_RANGE`] → [`HealthState::Alert`]
//! 6. otherwise → [`HealthState::Stable`]
//!
//! Server-declared offline and fraud states are never masked by local
//! temperature readings, and integrity violations outrank temperature
//! excursions.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// Safe storage band in degrees Celsius.
pub const SAFE_TEMPERATURE_RANGE: RangeInclusive<f64> = 2.0..=8.0;

/// Health of one device, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Offline,
    Awaiting,
    Fraud,
    Violation,
    Alert,
    Stable,
}

impl HealthState {
    /// Stable upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Offline => "OFFLINE",
            HealthState::Awaiting => "AWAITING",
            HealthState::Fraud => "FRAUD",
            HealthState::Violation => "VIOLATION",
            HealthState::Alert => "ALERT",
            HealthState::Stable => "STABLE",
        }
    }

    /// Returns true when telemetry values should not be displayed.
    pub fn hides_readings(&self) -> bool {
        matches!(self, HealthState::Offline | HealthState::Awaiting)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn status_is(snapshot: &Snapshot, names: &[&str]) -> bool {
    snapshot
        .operational_status
        .as_deref()
        .map(str::trim)
        .is_some_and(|s| names.iter().any(|n| s.eq_ignore_ascii_case(n)))
}

/// Classify a snapshot. Total and deterministic.
pub fn classify(snapshot: &Snapshot) -> HealthState {
    if snapshot.fetch_failed || status_is(snapshot, &["OFFLINE"]) {
        return HealthState::Offline;
    }

    let Some(score) = snapshot.health_score else {
        return HealthState::Awaiting;
    };
    if status_is(snapshot, &["AWAITING", "AGUARDANDO"]) {
        return HealthState::Awaiting;
    }

    if score == 0 {
        return HealthState::Fraud;
    }

    if snapshot.tampered || snapshot.lid_open {
        return HealthState::Violation;
    }

    if let Some(t) = snapshot.temperature {
        if t.is_finite() && !SAFE_TEMPERATURE_RANGE.contains(&t) {
            return HealthState::Alert;
        }
    }

    HealthState::Stable
}

/// Operator-facing label for a classified snapshot.
///
/// Stable devices show their score (`"75% Saúde"`); every other state shows
/// its name.
pub fn status_label(state: HealthState, health_score: Option<u8>) -> String {
    match (state, health_score) {
        (HealthState::Stable, Some(score)) => format!("{score}% Saúde"),
        (state, _) => state.as_str().to_string(),
    }
}
