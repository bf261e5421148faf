//! Configuration for the fleet monitor.
//!
//! Loaded from `COLDWATCH_*` environment variables; the binary applies
//! command-line overrides on top.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use coldwatch_id::DeviceId;
use coldwatch_reconcile::EngineConfig;

use crate::dispatcher::DispatchPolicy;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Fleet monitor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telemetry service base URL.
    pub api_url: String,

    /// Tracked devices, in display order.
    pub devices: Vec<DeviceId>,

    /// Delay between the end of one poll cycle and the start of the next.
    pub poll_interval: Duration,

    /// Per-request timeout for snapshot fetches.
    pub fetch_timeout: Duration,

    /// Attempts per control command.
    pub dispatch_attempts: u32,

    /// Per-attempt timeout for control commands.
    pub dispatch_timeout: Duration,

    /// Fixed wait between failed command attempts.
    pub dispatch_backoff: Duration,

    /// How long an unconfirmed command holds the optimistic display.
    pub intent_expiry: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_string(),
            devices: ["box_01", "box_02", "box_03"]
                .into_iter()
                .filter_map(|s| DeviceId::parse(s).ok())
                .collect(),
            poll_interval: Duration::from_millis(3000),
            fetch_timeout: Duration::from_millis(5000),
            dispatch_attempts: 3,
            dispatch_timeout: Duration::from_millis(5000),
            dispatch_backoff: Duration::from_millis(500),
            intent_expiry: Duration::from_secs(45),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    lookup(name)
        .map(|v| v.trim().parse::<u64>())
        .transpose()
        .with_context(|| format!("{name} must be a non-negative integer."))
}

/// Parse a comma-separated device list.
pub fn parse_fleet(raw: &str) -> Result<Vec<DeviceId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| DeviceId::parse(s).with_context(|| format!("Invalid device id '{s}'")))
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Only parses; call [`Config::validate`] once overrides are applied.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_url = lookup("COLDWATCH_API_URL").unwrap_or(defaults.api_url);

        let devices = match lookup("COLDWATCH_DEVICES") {
            Some(raw) => parse_fleet(&raw).context("COLDWATCH_DEVICES is invalid.")?,
            None => defaults.devices,
        };

        let ms = |name: &str, default: Duration| -> Result<Duration> {
            Ok(parse_u64(&lookup, name)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let poll_interval = ms("COLDWATCH_POLL_INTERVAL_MS", defaults.poll_interval)?;
        let fetch_timeout = ms("COLDWATCH_FETCH_TIMEOUT_MS", defaults.fetch_timeout)?;
        let dispatch_timeout = ms("COLDWATCH_DISPATCH_TIMEOUT_MS", defaults.dispatch_timeout)?;
        let dispatch_backoff = ms("COLDWATCH_DISPATCH_BACKOFF_MS", defaults.dispatch_backoff)?;

        let dispatch_attempts = parse_u64(&lookup, "COLDWATCH_DISPATCH_ATTEMPTS")?
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(defaults.dispatch_attempts);

        let intent_expiry = parse_u64(&lookup, "COLDWATCH_INTENT_EXPIRY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.intent_expiry);

        let log_level = lookup("COLDWATCH_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_format = match lookup("COLDWATCH_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("COLDWATCH_LOG_FORMAT must be 'text' or 'json', got '{other}'."),
        };

        Ok(Self {
            api_url,
            devices,
            poll_interval,
            fetch_timeout,
            dispatch_attempts,
            dispatch_timeout,
            dispatch_backoff,
            intent_expiry,
            log_level,
            log_format,
        })
    }

    /// Check values and the ordering of timeouts.
    ///
    /// A command attempt must time out well before its intent expires, and a
    /// poll must be able to observe the device inside the expiration window.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            bail!("API URL must not be empty.");
        }

        if self.devices.is_empty() {
            bail!("At least one device must be configured.");
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.devices.iter().find(|id| !seen.insert(*id)) {
            bail!("Device '{dup}' is configured more than once.");
        }

        if self.poll_interval.is_zero() {
            bail!("Poll interval must be greater than zero.");
        }

        if self.dispatch_attempts == 0 {
            bail!("Dispatch attempts must be at least 1.");
        }

        if self.dispatch_timeout >= self.intent_expiry {
            bail!(
                "Dispatch timeout ({:?}) must be shorter than the intent expiry ({:?}).",
                self.dispatch_timeout,
                self.intent_expiry
            );
        }

        if self.poll_interval >= self.intent_expiry {
            bail!(
                "Poll interval ({:?}) must be shorter than the intent expiry ({:?}).",
                self.poll_interval,
                self.intent_expiry
            );
        }

        Ok(())
    }

    /// Retry policy for the command dispatcher.
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_attempts: self.dispatch_attempts,
            attempt_timeout: self.dispatch_timeout,
            backoff: self.dispatch_backoff,
        }
    }

    /// Configuration for the reconciliation engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            expiration_window: self.intent_expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let config = parse(vars)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8000");
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.dispatch_attempts, 3);
        assert_eq!(config.dispatch_timeout, Duration::from_secs(5));
        assert_eq!(config.dispatch_backoff, Duration::from_millis(500));
        assert_eq!(config.intent_expiry, Duration::from_secs(45));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("COLDWATCH_API_URL", "http://telemetry:8000"),
            ("COLDWATCH_DEVICES", "box_07, box_08"),
            ("COLDWATCH_POLL_INTERVAL_MS", "2000"),
            ("COLDWATCH_INTENT_EXPIRY_SECS", "30"),
            ("COLDWATCH_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.api_url, "http://telemetry:8000");
        assert_eq!(
            config.devices,
            vec![
                DeviceId::parse("box_07").unwrap(),
                DeviceId::parse("box_08").unwrap()
            ]
        );
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.engine_config().expiration_window, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(load(&[("COLDWATCH_POLL_INTERVAL_MS", "soon")]).is_err());
        assert!(load(&[("COLDWATCH_DISPATCH_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn test_rejects_bad_fleet() {
        assert!(load(&[("COLDWATCH_DEVICES", "")]).is_err());
        assert!(load(&[("COLDWATCH_DEVICES", "box 1")]).is_err());
        assert!(load(&[("COLDWATCH_DEVICES", "a,b,a")]).is_err());
    }

    #[test]
    fn test_overrides_fix_environment_before_validation() {
        let mut config = parse(&[
            ("COLDWATCH_API_URL", "  "),
            ("COLDWATCH_DEVICES", "a,b,a"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        config.api_url = "http://telemetry:8000".to_string();
        config.devices = parse_fleet("box_01,box_02").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_syntax_errors_fail_while_parsing() {
        assert!(parse(&[("COLDWATCH_DEVICES", "box 1")]).is_err());
        assert!(parse(&[("COLDWATCH_POLL_INTERVAL_MS", "soon")]).is_err());
        assert!(parse(&[("COLDWATCH_DISPATCH_ATTEMPTS", "0")]).is_ok());
    }

    #[test]
    fn test_timeout_ordering_enforced() {
        assert!(load(&[
            ("COLDWATCH_DISPATCH_TIMEOUT_MS", "50000"),
            ("COLDWATCH_INTENT_EXPIRY_SECS", "45"),
        ])
        .is_err());
        assert!(load(&[
            ("COLDWATCH_POLL_INTERVAL_MS", "60000"),
            ("COLDWATCH_INTENT_EXPIRY_SECS", "45"),
        ])
        .is_err());
    }

    #[test]
    fn test_dispatch_policy_from_config() {
        let policy = load(&[("COLDWATCH_DISPATCH_BACKOFF_MS", "250")])
            .unwrap()
            .dispatch_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_millis(250));
    }
}
