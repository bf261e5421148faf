//! Operator console.
//!
//! Parses operator lines read from stdin and renders the fleet for the
//! terminal.

use std::str::FromStr;

use coldwatch_id::{DeviceId, IdError};
use coldwatch_reconcile::{DeviceView, IntentEvent, OperatingMode};
use colored::Colorize;
use tabled::{Table, Tabled};
use thiserror::Error;

use crate::monitor::Notification;

pub const HELP: &str = "\
Commands:
  live <device> on|off   switch a device between live and eco telemetry
  refresh                poll the fleet now
  show                   print the fleet
  help                   show this message
  quit                   exit";

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    SetMode {
        device_id: DeviceId,
        mode: OperatingMode,
    },
    Refresh,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid device id: {0}")]
    InvalidDevice(#[from] IdError),
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ConsoleError::Empty);
        };
        let rest: Vec<&str> = words.collect();

        match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("live", [device, toggle]) => {
                let mode = match toggle.to_ascii_lowercase().as_str() {
                    "on" => OperatingMode::Live,
                    "off" => OperatingMode::Eco,
                    _ => return Err(ConsoleError::Usage("live <device> on|off")),
                };
                Ok(ConsoleCommand::SetMode {
                    device_id: DeviceId::parse(device)?,
                    mode,
                })
            }
            ("live", _) => Err(ConsoleError::Usage("live <device> on|off")),
            ("refresh", []) => Ok(ConsoleCommand::Refresh),
            ("show", []) => Ok(ConsoleCommand::Show),
            ("help" | "?", []) => Ok(ConsoleCommand::Help),
            ("quit" | "exit", []) => Ok(ConsoleCommand::Quit),
            (other, _) => Err(ConsoleError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    device: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Server status")]
    server_status: String,

    #[tabled(rename = "Indicator")]
    indicator: String,

    #[tabled(rename = "Temp")]
    temperature: String,

    #[tabled(rename = "Battery")]
    battery: String,

    #[tabled(rename = "Mode")]
    mode: String,

    #[tabled(rename = "Last seen")]
    last_seen: String,

    #[tabled(rename = "Recommendation")]
    recommendation: String,
}

impl From<&DeviceView> for DeviceRow {
    fn from(view: &DeviceView) -> Self {
        let mode = if view.is_mode_transitioning {
            format!("{} (switching)", view.display_mode)
        } else {
            view.display_mode.to_string()
        };

        Self {
            device: view.id.to_string(),
            status: view.status_label.clone(),
            server_status: display_option(&view.server_status),
            indicator: display_option(&view.indicator),
            temperature: view
                .display_temperature
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "-".to_string()),
            battery: view
                .display_battery
                .map(|b| format!("{b:.0}%"))
                .unwrap_or_else(|| "-".to_string()),
            mode,
            last_seen: view
                .last_seen
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
            recommendation: display_option(&view.recommendation),
        }
    }
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}

/// Render the fleet as a table.
pub fn render_table(views: &[DeviceView]) -> String {
    let rows: Vec<DeviceRow> = views.iter().map(DeviceRow::from).collect();
    Table::new(rows).to_string()
}

/// Render the fleet as pretty JSON.
pub fn render_json(views: &[DeviceView]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(views)
}

pub fn render(views: &[DeviceView], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => render_table(views),
        OutputFormat::Json => render_json(views).unwrap_or_else(|_| "[]".to_string()),
    }
}

/// One-line operator notice.
pub fn render_notification(notification: &Notification) -> String {
    match notification {
        Notification::Intent(IntentEvent::Confirmed {
            device_id, mode, ..
        }) => format!("{} {device_id} is now in {mode} mode", "Confirmed:".green().bold()),
        Notification::Intent(IntentEvent::Expired {
            device_id,
            target_mode,
            fallback_mode,
            ..
        }) => format!(
            "{} {device_id} did not switch to {target_mode} in time, showing {fallback_mode}",
            "Timeout:".yellow().bold()
        ),
        Notification::Intent(IntentEvent::DispatchFailed {
            device_id,
            target_mode,
            reverted_to,
            ..
        }) => format!(
            "{} could not send {target_mode} command to {device_id}, reverted to {reverted_to}",
            "Error:".red().bold()
        ),
        Notification::UnknownDevice(device_id) => {
            format!("{} {device_id} is not in the fleet", "Error:".red().bold())
        }
    }
}
