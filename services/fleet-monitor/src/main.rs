//! coldwatch - fleet monitor for thermally-monitored containers
//!
//! Polls every tracked device, prints the reconciled fleet, and accepts
//! operator commands on stdin. With `--once` it prints a single poll and
//! exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coldwatch_reconcile::ReconcileEngine;
use coldwatch_monitor::config::{parse_fleet, Config, LogFormat};
use coldwatch_monitor::console::{self, ConsoleCommand, OutputFormat, HELP};
use coldwatch_monitor::{
    Dispatcher, FleetHandle, FleetMonitor, MonitorError, Poller, TelemetryClient,
};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// coldwatch - monitor and control a fleet of cold-chain containers.
#[derive(Debug, Parser)]
#[command(name = "coldwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Telemetry service base URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Comma-separated device IDs to track.
    #[arg(long)]
    devices: Option<String>,

    /// Output format for the fleet view.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Poll once, print the fleet, and exit.
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;

        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(devices) = &self.devices {
            config.devices = parse_fleet(devices).context("--devices is invalid")?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);

    info!(
        api_url = %config.api_url,
        devices = config.devices.len(),
        "Configuration loaded"
    );

    let client = Arc::new(TelemetryClient::new(&config).context("Failed to build HTTP client")?);
    let poller = Poller::new(client.clone(), config.devices.clone());

    if cli.once {
        let mut engine = ReconcileEngine::new(config.devices.clone(), config.engine_config());
        let batch = poller.poll_once().await;
        engine.apply_batch(&batch, std::time::Instant::now());
        println!("{}", console::render(&engine.views(), cli.format));
        return Ok(());
    }

    let engine = ReconcileEngine::new(config.devices.clone(), config.engine_config());
    let dispatcher = Dispatcher::new(client, config.dispatch_policy());
    let monitor = FleetMonitor::new(engine, poller, dispatcher, config.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fleet, monitor_handle) = monitor.start(shutdown_rx);

    let printer_handle = tokio::spawn(print_updates(fleet.clone(), cli.format));

    println!("{}", HELP.dimmed());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = run_console(fleet, cli.format) => {
            if let Err(e) = result {
                error!(error = %e, "Console failed");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    printer_handle.abort();
    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Fleet monitor task panicked");
    }

    info!("Fleet monitor shutdown complete");
    Ok(())
}

/// Print the fleet after every change and each notification as it arrives.
async fn print_updates(fleet: FleetHandle, format: OutputFormat) {
    let mut views = fleet.watch_views();
    let mut notifications = fleet.subscribe();

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = views.borrow_and_update().clone();
                println!("{}", console::render(&snapshot, format));
            }
            received = notifications.recv() => match received {
                Ok(notification) => println!("{}", console::render_notification(&notification)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Read operator commands from stdin until `quit` or end of input.
async fn run_console(fleet: FleetHandle, format: OutputFormat) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                continue;
            }
        };

        match command {
            ConsoleCommand::SetMode { device_id, mode } => {
                match fleet.request_mode_change(device_id.clone(), mode).await {
                    Ok(request) => println!(
                        "{} {device_id} -> {mode} (ticket {})",
                        "Requested:".blue().bold(),
                        request.ticket
                    ),
                    // Reported through the notification stream.
                    Err(MonitorError::Reconcile(_)) => {}
                    Err(e @ MonitorError::Stopped) => return Err(e.into()),
                }
            }
            ConsoleCommand::Refresh => fleet.refresh()?,
            ConsoleCommand::Show => println!("{}", console::render(&fleet.views(), format)),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}
