//! Telemetry poller.
//!
//! One poll cycle fetches a snapshot for every tracked device concurrently
//! and always yields a full batch: a device whose fetch fails gets a
//! [`Snapshot::failed`] entry so the engine can mark it offline without
//! touching its pending intent.

use std::sync::Arc;

use coldwatch_id::DeviceId;
use coldwatch_reconcile::{Snapshot, SnapshotBatch};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::client::TelemetrySource;

/// Fetches fleet snapshots from a [`TelemetrySource`].
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn TelemetrySource>,
    fleet: Vec<DeviceId>,
}

impl Poller {
    pub fn new(source: Arc<dyn TelemetrySource>, fleet: Vec<DeviceId>) -> Self {
        Self { source, fleet }
    }

    pub fn fleet(&self) -> &[DeviceId] {
        &self.fleet
    }

    /// Run one poll cycle.
    pub async fn poll_once(&self) -> SnapshotBatch {
        let fetches = self.fleet.iter().map(|id| async move {
            match self.source.fetch_snapshot(id).await {
                Ok(snapshot) => (id.clone(), snapshot),
                Err(e) => {
                    warn!(device_id = %id, error = %e, "Snapshot fetch failed");
                    (id.clone(), Snapshot::failed())
                }
            }
        });

        let batch = SnapshotBatch::new(join_all(fetches).await);
        debug!(
            devices = batch.snapshots.len(),
            failed = batch.failed_count(),
            "Poll cycle complete"
        );
        batch
    }
}
