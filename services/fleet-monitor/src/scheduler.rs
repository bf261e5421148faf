//! Periodic task scheduling.
//!
//! [`every`] runs an async job on a fixed period. The period is measured from
//! the end of one run to the start of the next, so runs never overlap even
//! when a run takes longer than the period.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running schedule.
///
/// Dropping the handle cancels the schedule.
#[derive(Debug)]
pub struct ScheduleHandle {
    cancel: watch::Sender<bool>,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stop the schedule. A run in progress is abandoned.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Start the next run now instead of waiting out the period.
    ///
    /// Requests made while a run is in progress collapse into a single run
    /// after it completes.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait for the schedule task to exit.
    pub async fn shutdown(self) {
        self.cancel();
        let _ = self.task.await;
    }
}

/// Run `job` now and then every `interval` after each run completes.
pub fn every<F, Fut>(interval: Duration, mut job: F) -> ScheduleHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cancel, mut cancelled) = watch::channel(false);
    let trigger = Arc::new(Notify::new());
    let early = trigger.clone();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = job() => {}
                _ = cancelled.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = early.notified() => {
                    debug!("Scheduled run triggered early");
                }
                _ = cancelled.changed() => break,
            }
        }
        debug!("Schedule stopped");
    });

    ScheduleHandle {
        cancel,
        trigger,
        task,
    }
}
