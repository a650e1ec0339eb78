//! Fleet registry and bulk operations.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use farmhand_core::types::{Printer, PrinterStatus, RealtimeData};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{PrinterCommand, PrinterProbe};
use crate::error::{FleetError, FleetResult};

/// Hosts refreshed concurrently per batch.
const REFRESH_BATCH_SIZE: usize = 5;
/// Wall-clock ceiling for one refresh batch.
const BATCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Restart warnings kick in above this many targets.
const RESTART_WARNING_THRESHOLD: usize = 5;

/// Target selection for bulk operations: either explicit ids, or a
/// filter over status and tags.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct BulkSelector {
    #[serde(default)]
    pub printer_ids: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<PrinterStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Per-host outcome of a bulk dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub printer_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dry-run analysis of a bulk command.
#[derive(Debug, Clone, Serialize)]
pub struct BulkImpact {
    pub command: String,
    pub target_count: usize,
    pub targets: Vec<String>,
    /// Target count grouped by current status.
    pub by_status: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

/// In-memory printer registry with JSON persistence. The registry file
/// never contains `realtime_data`; telemetry lives only in memory and
/// is refreshed on `list`.
pub struct FleetService {
    printers: RwLock<HashMap<String, Printer>>,
    probe: Arc<dyn PrinterProbe>,
    registry_path: PathBuf,
}

impl FleetService {
    /// Load the registry file (or start empty when absent).
    pub fn load(registry_path: impl Into<PathBuf>, probe: Arc<dyn PrinterProbe>) -> FleetResult<Self> {
        let registry_path = registry_path.into();
        let printers = match std::fs::read(&registry_path) {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, Printer>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            count = printers.len(),
            path = %registry_path.display(),
            "printer registry loaded"
        );
        Ok(Self {
            printers: RwLock::new(printers),
            probe,
            registry_path,
        })
    }

    async fn persist(&self) -> FleetResult<()> {
        let snapshot = {
            let printers = self.printers.read().await;
            serde_json::to_vec_pretty(&*printers)?
        };
        let tmp = self.registry_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &snapshot).await?;
        tokio::fs::rename(&tmp, &self.registry_path).await?;
        Ok(())
    }

    /// Register or replace a printer and persist the registry.
    pub async fn upsert_printer(&self, printer: Printer) -> FleetResult<()> {
        {
            let mut printers = self.printers.write().await;
            printers.insert(printer.id.clone(), printer);
        }
        self.persist().await
    }

    /// Remove a printer; true when it existed.
    pub async fn remove_printer(&self, printer_id: &str) -> FleetResult<bool> {
        let removed = {
            let mut printers = self.printers.write().await;
            printers.remove(printer_id).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Snapshot one printer without refreshing.
    pub async fn get(&self, printer_id: &str) -> Option<Printer> {
        let printers = self.printers.read().await;
        printers.get(printer_id).cloned()
    }

    /// Refresh every printer (batched, bounded) and return the fleet
    /// sorted by id.
    pub async fn list(&self) -> Vec<Printer> {
        let ids: Vec<String> = {
            let printers = self.printers.read().await;
            let mut ids: Vec<String> = printers.keys().cloned().collect();
            ids.sort();
            ids
        };

        for batch in ids.chunks(REFRESH_BATCH_SIZE) {
            let refreshes = batch.iter().map(|id| self.refresh_one(id.clone()));
            if tokio::time::timeout(BATCH_TIMEOUT, join_all(refreshes))
                .await
                .is_err()
            {
                warn!(batch = ?batch, "refresh batch hit its wall-clock ceiling");
                let mut printers = self.printers.write().await;
                for id in batch {
                    if let Some(printer) = printers.get_mut(id) {
                        printer.status = PrinterStatus::Timeout;
                        printer.realtime_data = RealtimeData::default();
                    }
                }
            }
        }

        let printers = self.printers.read().await;
        let mut list: Vec<Printer> = printers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Refresh a single printer in place. Probe failures mark the host
    /// instead of propagating.
    async fn refresh_one(&self, printer_id: String) {
        let Some(snapshot) = self.get(&printer_id).await else {
            return;
        };

        let (status, realtime) = match self.probe.status(&snapshot).await {
            Ok(status) => {
                let realtime = match self.probe.temperatures(&snapshot).await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(printer_id = %printer_id, error = %e, "temperature query failed");
                        RealtimeData::default()
                    }
                };
                (status, realtime)
            }
            Err(FleetError::Timeout) => (PrinterStatus::Timeout, RealtimeData::default()),
            Err(FleetError::Transport(_)) => (PrinterStatus::Unreachable, RealtimeData::default()),
            Err(e) => {
                warn!(printer_id = %printer_id, error = %e, "printer refresh failed");
                (PrinterStatus::Error, RealtimeData::default())
            }
        };

        let mut printers = self.printers.write().await;
        if let Some(printer) = printers.get_mut(&printer_id) {
            printer.status = status;
            printer.realtime_data = realtime;
        }
    }

    /// Dispatch a command to one printer.
    pub async fn command(&self, printer_id: &str, command: &PrinterCommand) -> FleetResult<()> {
        let printer = self
            .get(printer_id)
            .await
            .ok_or_else(|| FleetError::NotFound(printer_id.to_string()))?;
        self.probe.command(&printer, command).await
    }

    /// Resolve a selector against the current registry.
    async fn select(&self, selector: &BulkSelector) -> Vec<Printer> {
        let printers = self.printers.read().await;
        let mut selected: Vec<Printer> = match &selector.printer_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| printers.get(id).cloned())
                .collect(),
            None => printers
                .values()
                .filter(|p| {
                    selector.status.map_or(true, |s| p.status == s)
                        && selector.tags.as_ref().map_or(true, |tags| {
                            tags.iter().all(|t| p.tags.contains(t))
                        })
                })
                .cloned()
                .collect(),
        };
        selected.sort_by(|a, b| a.id.cmp(&b.id));
        selected
    }

    /// Execute a command against every selected printer in parallel.
    pub async fn bulk_command(
        &self,
        selector: &BulkSelector,
        command: &PrinterCommand,
    ) -> Vec<BulkOutcome> {
        let targets = self.select(selector).await;
        let dispatches = targets.iter().map(|printer| async {
            let outcome = self.probe.command(printer, command).await;
            BulkOutcome {
                printer_id: printer.id.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            }
        });
        join_all(dispatches).await
    }

    /// Same selection as `bulk_command`, without dispatching: returns
    /// the impact analysis.
    pub async fn validate_bulk_command(
        &self,
        selector: &BulkSelector,
        command: &PrinterCommand,
    ) -> BulkImpact {
        let targets = self.select(selector).await;

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for printer in &targets {
            let key = serde_json::to_value(printer.status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "unknown".to_string());
            *by_status.entry(key).or_insert(0) += 1;
        }

        let mut warnings = Vec::new();
        let restarts = matches!(
            command,
            PrinterCommand::RestartKlipper | PrinterCommand::RestartFirmware
        );
        if restarts && targets.len() > RESTART_WARNING_THRESHOLD {
            warnings.push(format!(
                "{} targets {} hosts; restarting that many controllers at once will idle the farm",
                command.name(),
                targets.len()
            ));
        }
        let printing = targets
            .iter()
            .filter(|p| p.status == PrinterStatus::Printing)
            .count();
        if command.is_destructive() && printing > 0 {
            warnings.push(format!(
                "{} would interrupt {} running print(s)",
                command.name(),
                printing
            ));
        }

        BulkImpact {
            command: command.name().to_string(),
            target_count: targets.len(),
            targets: targets.iter().map(|p| p.id.clone()).collect(),
            by_status,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use farmhand_core::types::Temperatures;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe scripted per printer id.
    #[derive(Default)]
    struct MockProbe {
        command_calls: AtomicUsize,
    }

    #[async_trait]
    impl PrinterProbe for MockProbe {
        async fn status(&self, printer: &Printer) -> FleetResult<PrinterStatus> {
            match printer.id.as_str() {
                id if id.starts_with("dead") => {
                    Err(FleetError::Transport("connection refused".into()))
                }
                id if id.starts_with("slow") => Err(FleetError::Timeout),
                id if id.starts_with("busy") => Ok(PrinterStatus::Printing),
                _ => Ok(PrinterStatus::Idle),
            }
        }

        async fn temperatures(&self, _printer: &Printer) -> FleetResult<RealtimeData> {
            Ok(RealtimeData {
                extruder: Some(Temperatures {
                    temp: 205.0,
                    target: 210.0,
                }),
                bed: Some(Temperatures {
                    temp: 60.0,
                    target: 60.0,
                }),
                job: Default::default(),
            })
        }

        async fn command(&self, printer: &Printer, _command: &PrinterCommand) -> FleetResult<()> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            if printer.id.starts_with("dead") {
                Err(FleetError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn printer(id: &str) -> Printer {
        Printer::new(id, format!("Printer {id}"), "vcore-500", "http://host:7125")
    }

    async fn service_with(ids: &[&str]) -> (tempfile::TempDir, Arc<MockProbe>, FleetService) {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(MockProbe::default());
        let service =
            FleetService::load(dir.path().join("printers.json"), probe.clone()).unwrap();
        for id in ids {
            service.upsert_printer(printer(id)).await.unwrap();
        }
        (dir, probe, service)
    }

    #[test]
    fn test_list_refreshes_and_marks_failures() {
        tokio_test::block_on(async {
            let (_dir, _probe, service) =
                service_with(&["alpha", "busy-1", "dead-1", "slow-1"]).await;
            let fleet = service.list().await;
            let by_id: HashMap<&str, &Printer> =
                fleet.iter().map(|p| (p.id.as_str(), p)).collect();

            assert_eq!(by_id["alpha"].status, PrinterStatus::Idle);
            assert_eq!(by_id["busy-1"].status, PrinterStatus::Printing);
            assert_eq!(by_id["dead-1"].status, PrinterStatus::Unreachable);
            assert_eq!(by_id["slow-1"].status, PrinterStatus::Timeout);

            // Healthy hosts carry telemetry; failed ones are blank.
            assert!(by_id["alpha"].realtime_data.extruder.is_some());
            assert!(by_id["dead-1"].realtime_data.is_empty());
        });
    }

    #[test]
    fn test_registry_persists_without_realtime_data() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("printers.json");
            {
                let probe = Arc::new(MockProbe::default());
                let service = FleetService::load(&path, probe).unwrap();
                service.upsert_printer(printer("alpha")).await.unwrap();
                // list() populates telemetry in memory only.
                service.list().await;
                service.upsert_printer(printer("beta")).await.unwrap();
            }

            let raw = std::fs::read_to_string(&path).unwrap();
            assert!(!raw.contains("realtime_data"));

            let probe = Arc::new(MockProbe::default());
            let reloaded = FleetService::load(&path, probe).unwrap();
            assert!(reloaded.get("alpha").await.is_some());
            assert!(reloaded.get("beta").await.is_some());
        });
    }

    #[test]
    fn test_bulk_command_with_explicit_ids() {
        tokio_test::block_on(async {
            let (_dir, probe, service) = service_with(&["alpha", "beta", "dead-1"]).await;
            let selector = BulkSelector {
                printer_ids: Some(vec!["alpha".into(), "dead-1".into()]),
                ..Default::default()
            };
            let outcomes = service
                .bulk_command(&selector, &PrinterCommand::Pause)
                .await;

            assert_eq!(outcomes.len(), 2);
            assert_eq!(probe.command_calls.load(Ordering::SeqCst), 2);
            let alpha = outcomes.iter().find(|o| o.printer_id == "alpha").unwrap();
            assert!(alpha.success);
            let dead = outcomes.iter().find(|o| o.printer_id == "dead-1").unwrap();
            assert!(!dead.success);
            assert!(dead.error.as_ref().unwrap().contains("connection refused"));
        });
    }

    #[test]
    fn test_bulk_selector_filters_by_status_and_tags() {
        tokio_test::block_on(async {
            let (_dir, _probe, service) = service_with(&[]).await;
            let mut a = printer("a");
            a.status = PrinterStatus::Idle;
            a.tags = vec!["rack-1".into()];
            let mut b = printer("b");
            b.status = PrinterStatus::Idle;
            let mut c = printer("c");
            c.status = PrinterStatus::Printing;
            c.tags = vec!["rack-1".into()];
            for p in [a, b, c] {
                service.upsert_printer(p).await.unwrap();
            }

            let selector = BulkSelector {
                status: Some(PrinterStatus::Idle),
                tags: Some(vec!["rack-1".into()]),
                ..Default::default()
            };
            let impact = service
                .validate_bulk_command(&selector, &PrinterCommand::Pause)
                .await;
            assert_eq!(impact.targets, vec!["a".to_string()]);
        });
    }

    #[test]
    fn test_validate_warns_on_mass_restart_and_printing_hosts() {
        tokio_test::block_on(async {
            let ids: Vec<String> = (0..6).map(|i| format!("busy-{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let (_dir, probe, service) = service_with(&id_refs).await;
            // Populate statuses so the printing warning has targets.
            service.list().await;

            let impact = service
                .validate_bulk_command(&BulkSelector::default(), &PrinterCommand::RestartFirmware)
                .await;
            assert_eq!(impact.target_count, 6);
            assert_eq!(impact.by_status.get("printing"), Some(&6));
            assert_eq!(impact.warnings.len(), 2);
            // Validation never dispatches.
            assert_eq!(probe.command_calls.load(Ordering::SeqCst), 0);
        });
    }
}
