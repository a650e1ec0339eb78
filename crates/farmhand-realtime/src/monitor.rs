//! The realtime monitor: polls the fleet, diffs snapshots, schedules
//! broadcasts through the hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use farmhand_core::types::{Printer, PrinterStatus};
use farmhand_fleet::FleetService;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hub::WebSocketHub;

/// Temperature delta (°C) that counts as a change.
const TEMP_DELTA: f64 = 1.0;
/// Ceiling on one fleet refresh.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-tick work cap.
const MAX_PRINTERS_PER_TICK: usize = 10;
/// Cooperative yield cadence inside a tick.
const YIELD_EVERY: usize = 3;
/// Consecutive errors before the loop backs off.
const ERROR_BACKOFF_THRESHOLD: u32 = 5;
/// Back-off pause after repeated errors.
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Read side of the fleet, as the monitor and hub see it.
#[async_trait]
pub trait FleetView: Send + Sync {
    /// Refresh and return the fleet.
    async fn list(&self) -> Vec<Printer>;
}

#[async_trait]
impl FleetView for FleetService {
    async fn list(&self) -> Vec<Printer> {
        FleetService::list(self).await
    }
}

/// Monitor cadence knobs.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Poll period.
    pub update_interval: Duration,
    /// Re-broadcast period for unchanged printers.
    pub heartbeat: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            heartbeat: Duration::from_secs(60),
        }
    }
}

/// The reduced state compared between ticks.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    status: PrinterStatus,
    extruder_temp: Option<f64>,
    extruder_target: Option<f64>,
    bed_temp: Option<f64>,
    bed_target: Option<f64>,
}

impl Snapshot {
    fn of(printer: &Printer) -> Self {
        let rt = &printer.realtime_data;
        Self {
            status: printer.status,
            extruder_temp: rt.extruder.map(|t| t.temp),
            extruder_target: rt.extruder.map(|t| t.target),
            bed_temp: rt.bed.map(|t| t.temp),
            bed_target: rt.bed.map(|t| t.target),
        }
    }

    /// Change test: status flip, or any temperature moving ≥ 1 °C.
    fn differs_from(&self, other: &Snapshot) -> bool {
        if self.status != other.status {
            return true;
        }
        let moved = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() >= TEMP_DELTA,
            (None, None) => false,
            _ => true,
        };
        moved(self.extruder_temp, other.extruder_temp)
            || moved(self.extruder_target, other.extruder_target)
            || moved(self.bed_temp, other.bed_temp)
            || moved(self.bed_target, other.bed_target)
    }
}

/// Supervised poll loop. One instance runs per process; `run` exits
/// promptly on cancellation.
pub struct RealtimeMonitor {
    fleet: Arc<dyn FleetView>,
    hub: Arc<WebSocketHub>,
    settings: MonitorSettings,
    last_broadcast: HashMap<String, (Snapshot, Instant)>,
    consecutive_errors: u32,
}

impl RealtimeMonitor {
    pub fn new(fleet: Arc<dyn FleetView>, hub: Arc<WebSocketHub>) -> Self {
        Self::with_settings(fleet, hub, MonitorSettings::default())
    }

    pub fn with_settings(
        fleet: Arc<dyn FleetView>,
        hub: Arc<WebSocketHub>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            fleet,
            hub,
            settings,
            last_broadcast: HashMap::new(),
            consecutive_errors: 0,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_s = self.settings.update_interval.as_secs_f64(),
            "realtime monitor started"
        );
        let mut ticker = tokio::time::interval(self.settings.update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("realtime monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(()) => self.consecutive_errors = 0,
                Err(e) => {
                    self.consecutive_errors += 1;
                    error!(
                        error = %e,
                        consecutive = self.consecutive_errors,
                        "monitor tick failed"
                    );
                    if self.consecutive_errors >= ERROR_BACKOFF_THRESHOLD {
                        debug!("monitor backing off after repeated errors");
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        }
                        self.consecutive_errors = 0;
                    }
                }
            }
        }
    }

    /// One poll cycle. Public for tests; the loop drives it.
    pub async fn tick(&mut self) -> Result<(), String> {
        // Nobody listening: skip the fleet entirely.
        if self.hub.client_count().await == 0 {
            return Ok(());
        }

        let printers = tokio::time::timeout(LIST_TIMEOUT, self.fleet.list())
            .await
            .map_err(|_| "fleet refresh timed out".to_string())?;

        for (index, printer) in printers.iter().take(MAX_PRINTERS_PER_TICK).enumerate() {
            if index > 0 && index % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            self.consider(printer).await;
        }
        Ok(())
    }

    /// Broadcast when the printer is new, changed, or due a heartbeat.
    async fn consider(&mut self, printer: &Printer) {
        let snapshot = Snapshot::of(printer);
        let due = match self.last_broadcast.get(&printer.id) {
            None => true,
            Some((previous, at)) => {
                snapshot.differs_from(previous) || at.elapsed() >= self.settings.heartbeat
            }
        };
        if !due {
            return;
        }

        let payload = json!({
            "id": printer.id,
            "name": printer.name,
            "status": printer.status,
            "extruder": printer.realtime_data.extruder,
            "bed": printer.realtime_data.bed,
        });
        self.hub.broadcast_printer_data(&printer.id, payload).await;
        self.last_broadcast
            .insert(printer.id.clone(), (snapshot, Instant::now()));
    }
}
