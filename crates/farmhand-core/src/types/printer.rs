//! Printer and fleet data model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Observed printer state.
///
/// The first five come from the controller; the last three are assigned
/// by the fleet service when a refresh fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    Idle,
    Printing,
    Paused,
    Error,
    #[default]
    Offline,
    Unreachable,
    Timeout,
}

impl PrinterStatus {
    /// Statuses assigned locally when the host cannot be queried.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Error | Self::Unreachable | Self::Timeout)
    }
}

/// One heater's temperature pair in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Temperatures {
    pub temp: f64,
    pub target: f64,
}

/// Last observed telemetry for a printer. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RealtimeData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extruder: Option<Temperatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed: Option<Temperatures>,
    /// Job telemetry fields passed through from the controller.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub job: HashMap<String, serde_json::Value>,
}

impl RealtimeData {
    pub fn is_empty(&self) -> bool {
        self.extruder.is_none() && self.bed.is_none() && self.job.is_empty()
    }
}

/// A registered printer.
///
/// `realtime_data` is volatile and excluded from the registry file; the
/// fleet service re-populates it on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub id: String,
    pub name: String,
    pub model: String,
    /// Base URL of the controller, e.g. `http://10.0.0.12:7125`.
    pub address: String,
    #[serde(default)]
    pub status: PrinterStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip)]
    pub realtime_data: RealtimeData,
}

impl Printer {
    /// Create a printer record with no capabilities and offline status.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
            address: address.into(),
            status: PrinterStatus::Offline,
            capabilities: Vec::new(),
            location: None,
            tags: Vec::new(),
            realtime_data: RealtimeData::default(),
        }
    }
}
