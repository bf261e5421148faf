//! coldwatch fleet monitor.
//!
//! Polls a remote telemetry service for a fleet of thermally-monitored
//! containers, sends live-mode commands on operator request, and reconciles
//! both into a flicker-free per-device view.
//!
//! ## Architecture
//!
//! - **Client**: HTTP access to the telemetry service
//! - **Poller**: concurrent per-device fetches, one batch per cycle
//! - **Dispatcher**: command delivery with bounded retries
//! - **Scheduler**: non-overlapping periodic runs
//! - **Monitor**: the event loop that owns the reconciliation engine
//! - **Console**: operator commands and terminal rendering

pub mod client;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod monitor;
pub mod poller;
pub mod scheduler;

pub use client::{ClientError, CommandSink, TelemetryClient, TelemetrySource};
pub use config::{Config, LogFormat};
pub use dispatcher::{DispatchError, DispatchPolicy, Dispatcher};
pub use monitor::{FleetHandle, FleetMonitor, MonitorError, Notification};
pub use poller::Poller;
pub use scheduler::{every, ScheduleHandle};
