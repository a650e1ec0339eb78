//! Moonraker-shaped printer controller client.

use std::time::Duration;

use async_trait::async_trait;
use farmhand_core::types::{Printer, PrinterStatus, RealtimeData, Temperatures};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, FleetResult};

const INFO_TIMEOUT: Duration = Duration::from_secs(5);
const TEMPERATURES_TIMEOUT: Duration = Duration::from_secs(3);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Axes selectable for a home command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeAxes {
    X,
    Y,
    Z,
    Xyz,
}

/// Commands the fleet can dispatch to a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrinterCommand {
    Home { axes: HomeAxes },
    Pause,
    Resume,
    Cancel,
    RestartKlipper,
    RestartFirmware,
}

impl PrinterCommand {
    /// Short name used in logs and impact analyses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Home { .. } => "home",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::RestartKlipper => "restart_klipper",
            Self::RestartFirmware => "restart_firmware",
        }
    }

    /// Whether the command can ruin a running print.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::Cancel | Self::RestartKlipper | Self::RestartFirmware
        )
    }

    /// G-code script for commands that travel through the script
    /// endpoint; restart commands use dedicated endpoints instead.
    fn gcode_script(&self) -> Option<String> {
        match self {
            Self::Home { axes } => Some(match axes {
                HomeAxes::X => "G28 X".to_string(),
                HomeAxes::Y => "G28 Y".to_string(),
                HomeAxes::Z => "G28 Z".to_string(),
                HomeAxes::Xyz => "G28".to_string(),
            }),
            Self::Pause => Some("PAUSE".to_string()),
            Self::Resume => Some("RESUME".to_string()),
            Self::Cancel => Some("CANCEL_PRINT".to_string()),
            Self::RestartKlipper | Self::RestartFirmware => None,
        }
    }
}

/// Seam between the fleet service and printer controllers.
#[async_trait]
pub trait PrinterProbe: Send + Sync {
    /// Query the controller's state.
    async fn status(&self, printer: &Printer) -> FleetResult<PrinterStatus>;

    /// Query extruder and bed temperatures plus job telemetry.
    async fn temperatures(&self, printer: &Printer) -> FleetResult<RealtimeData>;

    /// Dispatch a command.
    async fn command(&self, printer: &Printer, command: &PrinterCommand) -> FleetResult<()>;
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    result: InfoResult,
}

#[derive(Debug, Deserialize)]
struct InfoResult {
    state: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    status: QueryStatus,
}

#[derive(Debug, Deserialize, Default)]
struct QueryStatus {
    #[serde(default)]
    extruder: Option<HeaterState>,
    #[serde(default)]
    heater_bed: Option<HeaterState>,
}

#[derive(Debug, Deserialize)]
struct HeaterState {
    #[serde(default)]
    temperature: f64,
    #[serde(default)]
    target: f64,
}

/// HTTP client shared by every printer; the per-printer base URL comes
/// from the registry record.
pub struct HttpPrinterClient {
    http: reqwest::Client,
}

impl HttpPrinterClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn check(response: reqwest::Response) -> FleetResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(FleetError::Controller {
            status: status.as_u16(),
            detail,
        })
    }
}

impl Default for HttpPrinterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrinterProbe for HttpPrinterClient {
    async fn status(&self, printer: &Printer) -> FleetResult<PrinterStatus> {
        let url = format!("{}/printer/info", printer.address.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .timeout(INFO_TIMEOUT)
            .send()
            .await
            .map_err(FleetError::from_reqwest)?;
        let info: InfoResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FleetError::InvalidResponse(e.to_string()))?;

        let status = match info.result.state.as_str() {
            "ready" => PrinterStatus::Idle,
            "printing" => PrinterStatus::Printing,
            "paused" => PrinterStatus::Paused,
            "error" | "shutdown" => PrinterStatus::Error,
            other => {
                debug!(printer_id = %printer.id, state = other, "unrecognized controller state");
                PrinterStatus::Offline
            }
        };
        Ok(status)
    }

    async fn temperatures(&self, printer: &Printer) -> FleetResult<RealtimeData> {
        let url = format!(
            "{}/printer/objects/query?extruder&heater_bed",
            printer.address.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .timeout(TEMPERATURES_TIMEOUT)
            .send()
            .await
            .map_err(FleetError::from_reqwest)?;
        let query: QueryResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FleetError::InvalidResponse(e.to_string()))?;

        let heater = |h: Option<HeaterState>| {
            h.map(|h| Temperatures {
                temp: h.temperature,
                target: h.target,
            })
        };
        Ok(RealtimeData {
            extruder: heater(query.result.status.extruder),
            bed: heater(query.result.status.heater_bed),
            job: Default::default(),
        })
    }

    async fn command(&self, printer: &Printer, command: &PrinterCommand) -> FleetResult<()> {
        let base = printer.address.trim_end_matches('/');
        let request = match command.gcode_script() {
            Some(script) => self
                .http
                .post(format!("{base}/printer/gcode/script"))
                .query(&[("script", script.as_str())])
                .timeout(COMMAND_TIMEOUT),
            None => {
                let endpoint = match command {
                    PrinterCommand::RestartKlipper => "/printer/restart",
                    PrinterCommand::RestartFirmware => "/printer/firmware_restart",
                    _ => unreachable!("script-less commands are restarts"),
                };
                self.http
                    .post(format!("{base}{endpoint}"))
                    .timeout(COMMAND_TIMEOUT)
            }
        };

        let response = request.send().await.map_err(FleetError::from_reqwest)?;
        Self::check(response).await?;
        debug!(printer_id = %printer.id, command = command.name(), "command dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_scripts() {
        assert_eq!(
            PrinterCommand::Home { axes: HomeAxes::Xyz }.gcode_script(),
            Some("G28".to_string())
        );
        assert_eq!(
            PrinterCommand::Home { axes: HomeAxes::Z }.gcode_script(),
            Some("G28 Z".to_string())
        );
        assert_eq!(
            PrinterCommand::Pause.gcode_script(),
            Some("PAUSE".to_string())
        );
        assert_eq!(PrinterCommand::RestartKlipper.gcode_script(), None);
    }

    #[test]
    fn test_destructive_classification() {
        assert!(PrinterCommand::Cancel.is_destructive());
        assert!(PrinterCommand::RestartFirmware.is_destructive());
        assert!(!PrinterCommand::Pause.is_destructive());
        assert!(!PrinterCommand::Home { axes: HomeAxes::X }.is_destructive());
    }

    #[test]
    fn test_command_serde_tag() {
        let json = serde_json::to_string(&PrinterCommand::Home { axes: HomeAxes::Xyz }).unwrap();
        assert_eq!(json, r#"{"kind":"home","axes":"xyz"}"#);
        let back: PrinterCommand = serde_json::from_str(r#"{"kind":"pause"}"#).unwrap();
        assert_eq!(back, PrinterCommand::Pause);
    }
}
