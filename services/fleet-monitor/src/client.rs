//! Telemetry service API client.
//!
//! Provides methods for communicating with the remote telemetry service:
//! - Fetching the analysis snapshot for a device
//! - Sending live-mode control commands
//!
//! The [`TelemetrySource`] and [`CommandSink`] traits are the seams the
//! poller and dispatcher depend on; [`TelemetryClient`] implements both over
//! HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use coldwatch_id::DeviceId;
use coldwatch_reconcile::{HistoryEntry, OperatingMode, Snapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Errors talking to the telemetry service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Anything that can produce a snapshot for a device.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch the current snapshot for one device.
    async fn fetch_snapshot(&self, device_id: &DeviceId) -> Result<Snapshot, ClientError>;
}

/// Anything that can deliver a mode command to a device.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Send one mode command. `Ok` means the service accepted it.
    async fn send_mode_command(
        &self,
        device_id: &DeviceId,
        target: OperatingMode,
    ) -> Result<(), ClientError>;
}

/// HTTP client for the telemetry service.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: reqwest::Client,
    base_url: String,
    fetch_timeout: Duration,
}

impl TelemetryClient {
    /// Create a new telemetry client.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("coldwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            fetch_timeout: config.fetch_timeout,
        })
    }
}

#[async_trait]
impl TelemetrySource for TelemetryClient {
    async fn fetch_snapshot(&self, device_id: &DeviceId) -> Result<Snapshot, ClientError> {
        let url = format!("{}/analise/{}", self.base_url, device_id);
        let cache_buster = Utc::now().timestamp_millis();
        debug!(url = %url, "Fetching device analysis");

        let response = self
            .client
            .get(&url)
            .query(&[("t", cache_buster)])
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let analysis: AnalysisResponse = response.json().await?;
        Ok(analysis.into_snapshot())
    }
}

#[async_trait]
impl CommandSink for TelemetryClient {
    async fn send_mode_command(
        &self,
        device_id: &DeviceId,
        target: OperatingMode,
    ) -> Result<(), ClientError> {
        let url = format!("{}/controle/{}", self.base_url, device_id);
        let request = ControlRequest {
            comando: ControlCommand::for_mode(target),
        };
        debug!(device_id = %device_id, command = ?request.comando, "Sending control command");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %body, "Control command rejected");
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// `GET /analise/{device}` response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub analise_risco: Option<RiskAnalysis>,
    #[serde(default)]
    pub telemetria: Option<Telemetry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskAnalysis {
    #[serde(default)]
    pub health_score: Option<f64>,
    #[serde(default)]
    pub status_operacional: Option<String>,
    #[serde(default)]
    pub recomendacao: Option<String>,
    #[serde(default)]
    pub indicador_led: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub temperatura_atual: Option<f64>,
    #[serde(default)]
    pub violacao: Option<bool>,
    #[serde(default)]
    pub tampa_aberta: Option<bool>,
    #[serde(default)]
    pub bateria: Option<f64>,
    #[serde(default)]
    pub historico: Option<Vec<WireHistoryEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireHistoryEntry {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub temperatura: Option<f64>,
    #[serde(default)]
    pub tampa_aberta: Option<bool>,
    #[serde(default)]
    pub modo: Option<String>,
}

/// Parse a history timestamp. Naive timestamps are taken as UTC.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

impl AnalysisResponse {
    /// Normalize the wire response into a snapshot.
    pub fn into_snapshot(self) -> Snapshot {
        let risk = self.analise_risco.unwrap_or_default();
        let telemetry = self.telemetria.unwrap_or_default();

        let health_score = finite(risk.health_score).map(|s| s.round().clamp(0.0, 100.0) as u8);

        let history = telemetry
            .historico
            .unwrap_or_default()
            .into_iter()
            .map(|entry| HistoryEntry {
                time: entry.time.as_deref().and_then(parse_time),
                temperature: finite(entry.temperatura),
                lid_open: entry.tampa_aberta.unwrap_or(false),
                mode: entry.modo,
            })
            .collect();

        Snapshot {
            health_score,
            operational_status: risk.status_operacional,
            temperature: finite(telemetry.temperatura_atual),
            tampered: telemetry.violacao.unwrap_or(false),
            lid_open: telemetry.tampa_aberta.unwrap_or(false),
            battery: finite(telemetry.bateria),
            recommendation: risk.recomendacao,
            indicator: risk.indicador_led,
            history,
            fetch_failed: false,
        }
    }
}

/// `POST /controle/{device}` request body.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub comando: ControlCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlCommand {
    #[serde(rename = "MANUTENCAO_ON")]
    LiveOn,
    #[serde(rename = "MANUTENCAO_OFF")]
    LiveOff,
}

impl ControlCommand {
    pub fn for_mode(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Live => ControlCommand::LiveOn,
            OperatingMode::Eco => ControlCommand::LiveOff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_deserialization() {
        let json = r##"{
            "lote": "box_01",
            "analise_risco": {
                "health_score": 75.0,
                "status_operacional": "ALERTA",
                "indicador_led": "#eab308",
                "recomendacao": "Monitorar condições."
            },
            "telemetria": {
                "temperatura_atual": 5.2,
                "violacao": false,
                "tampa_aberta": true,
                "bateria": 64,
                "historico": [
                    {"time": "2025-12-17T12:00:03+00:00", "temperatura": 5.2, "tampa_aberta": true, "violacao": false, "modo": "LIVE"},
                    {"time": "2025-12-17T12:00:00", "temperatura": 5.0, "tampa_aberta": false, "violacao": false, "modo": "ECO"}
                ]
            }
        }"##;

        let response: AnalysisResponse = serde_json::from_str(json).unwrap();
        let snapshot = response.into_snapshot();

        assert_eq!(snapshot.health_score, Some(75));
        assert_eq!(snapshot.operational_status.as_deref(), Some("ALERTA"));
        assert_eq!(snapshot.indicator.as_deref(), Some("#eab308"));
        assert_eq!(snapshot.temperature, Some(5.2));
        assert!(snapshot.lid_open);
        assert!(!snapshot.tampered);
        assert_eq!(snapshot.battery, Some(64.0));
        assert_eq!(snapshot.history.len(), 2);
        assert!(snapshot.history[1].time.is_some());
        assert_eq!(snapshot.observed_mode(), Some(OperatingMode::Live));
    }

    #[test]
    fn test_nulls_and_missing_sections() {
        let json = r#"{
            "analise_risco": {"health_score": null, "status_operacional": null},
            "telemetria": {"temperatura_atual": null, "violacao": null}
        }"#;
        let snapshot = serde_json::from_str::<AnalysisResponse>(json)
            .unwrap()
            .into_snapshot();

        assert_eq!(snapshot.health_score, None);
        assert_eq!(snapshot.temperature, None);
        assert!(!snapshot.tampered);
        assert!(snapshot.history.is_empty());
        assert!(!snapshot.fetch_failed);

        let empty = serde_json::from_str::<AnalysisResponse>("{}")
            .unwrap()
            .into_snapshot();
        assert_eq!(empty, Snapshot::default());
    }

    #[test]
    fn test_fractional_score_rounds() {
        let response = AnalysisResponse {
            analise_risco: Some(RiskAnalysis {
                health_score: Some(59.6),
                ..Default::default()
            }),
            telemetria: None,
        };
        assert_eq!(response.into_snapshot().health_score, Some(60));
    }

    #[test]
    fn test_control_request_serialization() {
        let on = ControlRequest {
            comando: ControlCommand::for_mode(OperatingMode::Live),
        };
        let off = ControlRequest {
            comando: ControlCommand::for_mode(OperatingMode::Eco),
        };

        assert_eq!(
            serde_json::to_string(&on).unwrap(),
            r#"{"comando":"MANUTENCAO_ON"}"#
        );
        assert_eq!(
            serde_json::to_string(&off).unwrap(),
            r#"{"comando":"MANUTENCAO_OFF"}"#
        );
    }

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2025-12-17T12:00:00Z").is_some());
        assert!(parse_time("2025-12-17T12:00:00.123456").is_some());
        assert!(parse_time("yesterday").is_none());
    }
}
