//! Command dispatcher.
//!
//! Delivers a mode command to a device with bounded retries. Each attempt is
//! limited by its own timeout; failed attempts are separated by a fixed
//! backoff. The dispatcher reports only the terminal outcome and never
//! touches the reconciliation engine itself.

use std::sync::Arc;
use std::time::Duration;

use coldwatch_id::DeviceId;
use coldwatch_reconcile::{DispatchOutcome, OperatingMode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::CommandSink;

/// Retry policy for control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Timeout applied to each attempt.
    pub attempt_timeout: Duration,

    /// Wait between a failed attempt and the next one.
    pub backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
        }
    }
}

/// A command the service accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged {
    /// Attempt number that succeeded (1-based).
    pub attempts: u32,
}

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command to {device_id} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        device_id: DeviceId,
        attempts: u32,
        last_error: String,
    },
}

/// Sends mode commands through a [`CommandSink`] with retries.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn CommandSink>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn CommandSink>, policy: DispatchPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Deliver `target` to `device_id`, retrying per policy.
    pub async fn dispatch(
        &self,
        device_id: &DeviceId,
        target: OperatingMode,
    ) -> Result<Acknowledged, DispatchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(device_id = %device_id, mode = %target, attempt, "Dispatching mode command");

            let result = tokio::time::timeout(
                self.policy.attempt_timeout,
                self.sink.send_mode_command(device_id, target),
            )
            .await;

            match result {
                Ok(Ok(())) => {
                    info!(device_id = %device_id, mode = %target, attempt, "Mode command acknowledged");
                    return Ok(Acknowledged { attempts: attempt });
                }
                Ok(Err(e)) => {
                    warn!(device_id = %device_id, error = %e, attempt, max_attempts, "Mode command attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        device_id = %device_id,
                        timeout_ms = self.policy.attempt_timeout.as_millis() as u64,
                        attempt,
                        max_attempts,
                        "Mode command attempt timed out"
                    );
                    last_error = format!(
                        "timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        error!(
            device_id = %device_id,
            mode = %target,
            attempts = max_attempts,
            error = %last_error,
            "Mode command failed, giving up"
        );
        Err(DispatchError::Exhausted {
            device_id: device_id.clone(),
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Terminal outcome of a dispatch, as recorded by the engine.
pub fn outcome_of(result: &Result<Acknowledged, DispatchError>) -> DispatchOutcome {
    match result {
        Ok(_) => DispatchOutcome::Acknowledged,
        Err(_) => DispatchOutcome::Failed,
    }
}
