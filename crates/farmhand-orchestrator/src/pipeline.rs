//! The batch pipeline.
//!
//! Decision table (R = rotation enabled, P = plating enabled, N = files):
//!
//! | R | P | N   | behaviour                                          |
//! |---|---|-----|----------------------------------------------------|
//! | 0 | 0 | any | slice each file                                    |
//! | 1 | 0 | any | rotate → slice per file                            |
//! | 0 | 1 | ≥2  | pack into one plate → slice once                   |
//! | 1 | 1 | ≥2  | rotate per file → pack → slice once                |
//! | * | 1 | 1   | degrade to the single-file path                    |
//! | * | 1 | any | packing failure falls back to per-file processing  |
//!
//! The combined plate is never re-rotated.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use farmhand_core::config::{PlatingConfig, ProfileConfig, RotationConfig};
use farmhand_core::types::{FileProcessingResult, TaskState};
use farmhand_core::COMBINED_PLATE_FILENAME;
use farmhand_geometry::io as mesh_io;
use farmhand_geometry::MeshFormat;
use farmhand_slicer::SlicerGateway;
use farmhand_stores::{JsonSessionStore, SessionStore, TaskRegistry};
use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 3;

/// One batch submission.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub task_id: String,
    pub session_id: String,
    pub files: Vec<String>,
    pub rotation: RotationConfig,
    pub profile: ProfileConfig,
    pub plating: Option<PlatingConfig>,
}

#[derive(Debug, Clone)]
struct UnitSpec {
    filename: String,
    allow_rotation: bool,
}

/// Runs batches against the slicer, publishing progress to the task
/// registry. One instance serves the whole process; the semaphore is
/// the only throttle in front of the slicer.
pub struct BatchOrchestrator {
    registry: Arc<TaskRegistry>,
    sessions: Arc<JsonSessionStore>,
    slicer: Arc<dyn SlicerGateway>,
    semaphore: Arc<Semaphore>,
}

impl BatchOrchestrator {
    /// Create an orchestrator with the default worker pool size.
    pub fn new(
        registry: Arc<TaskRegistry>,
        sessions: Arc<JsonSessionStore>,
        slicer: Arc<dyn SlicerGateway>,
    ) -> Self {
        Self::with_max_concurrent(registry, sessions, slicer, DEFAULT_MAX_CONCURRENT)
    }

    /// Create an orchestrator with an explicit worker pool size.
    pub fn with_max_concurrent(
        registry: Arc<TaskRegistry>,
        sessions: Arc<JsonSessionStore>,
        slicer: Arc<dyn SlicerGateway>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            sessions,
            slicer,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Register the task and run the batch in the background.
    pub async fn submit(self: &Arc<Self>, request: BatchRequest) {
        self.registry
            .create(&request.task_id, &request.session_id, request.files.len())
            .await;
        let this = self.clone();
        tokio::spawn(async move {
            this.process_batch(request).await;
        });
    }

    /// Run a batch to its terminal state. Per-unit failures are
    /// recorded and never fail siblings; only setup errors fail the
    /// task as a whole.
    pub async fn process_batch(self: Arc<Self>, request: BatchRequest) {
        let task_id = request.task_id.clone();
        if self.registry.get(&task_id).await.is_none() {
            self.registry
                .create(&task_id, &request.session_id, request.files.len())
                .await;
        }

        if request.files.is_empty() {
            let _ = self
                .registry
                .mutate(&task_id, |task| {
                    task.start();
                    task.finish(TaskState::Completed);
                })
                .await;
            info!(task_id = %task_id, "empty batch completed immediately");
            return;
        }

        // Critical setup: the session must exist and its working
        // directory must be usable.
        if let Err(e) = self.sessions.load(&request.session_id).await {
            return self
                .fail_task(
                    &task_id,
                    format!("cannot read session '{}': {e}", request.session_id),
                )
                .await;
        }
        let workdir = match self.sessions.session_workdir(&request.session_id) {
            Ok(dir) => dir,
            Err(e) => {
                return self
                    .fail_task(&task_id, format!("cannot establish working directory: {e}"))
                    .await;
            }
        };

        let _ = self.registry.mutate(&task_id, |task| task.start()).await;

        let (units, plating_info) = self.plan_units(&request, &workdir).await;
        let combined = units.len() == 1 && units[0].filename == COMBINED_PLATE_FILENAME;
        if combined {
            // The plate is the only processing unit now.
            let _ = self
                .registry
                .mutate(&task_id, |task| task.progress.total_files = 1)
                .await;
        }

        let mut join_set = JoinSet::new();
        for unit in units {
            let this = self.clone();
            let task_id = task_id.clone();
            let session_id = request.session_id.clone();
            let rotation = request.rotation.clone();
            let profile = request.profile.clone();
            let workdir = workdir.clone();
            join_set.spawn(async move {
                // The semaphore is never closed while the orchestrator
                // lives, but a unit must not run without a permit.
                let Ok(_permit) = this.semaphore.clone().acquire_owned().await else {
                    return;
                };
                let _ = this
                    .registry
                    .mutate(&task_id, |task| task.progress.in_progress += 1)
                    .await;

                let outcome = AssertUnwindSafe(
                    this.run_unit(&unit, &session_id, &rotation, &profile, &workdir),
                )
                .catch_unwind()
                .await;
                let result = outcome.unwrap_or_else(|_| {
                    error!(file = %unit.filename, "unit panicked");
                    FileProcessingResult::failed(&unit.filename, "internal panic while processing")
                });

                let _ = this
                    .registry
                    .mutate(&task_id, |task| {
                        task.progress.in_progress = task.progress.in_progress.saturating_sub(1);
                        task.record_result(result);
                    })
                    .await;
            });
        }
        while join_set.join_next().await.is_some() {}

        let _ = self
            .registry
            .mutate(&task_id, |task| task.finish(TaskState::Completed))
            .await;
        self.finalize_session(&request, plating_info).await;

        if let Some(task) = self.registry.get(&task_id).await {
            info!(
                task_id = %task_id,
                completed = task.progress.completed,
                failed = task.progress.failed,
                "batch finished"
            );
        }
    }

    /// Resolve the decision table into processing units, building the
    /// combined plate when plating applies.
    async fn plan_units(
        &self,
        request: &BatchRequest,
        workdir: &Path,
    ) -> (Vec<UnitSpec>, Option<serde_json::Value>) {
        let plating = request.plating.clone().unwrap_or_default();
        let per_file = |allow_rotation: bool| -> Vec<UnitSpec> {
            request
                .files
                .iter()
                .map(|f| UnitSpec {
                    filename: f.clone(),
                    allow_rotation,
                })
                .collect()
        };

        if !plating.enabled {
            return (per_file(request.rotation.enabled), None);
        }
        if request.files.len() < 2 {
            info!(
                task_id = %request.task_id,
                "plating requested for a single file; using the single-file path"
            );
            return (
                per_file(request.rotation.enabled),
                Some(json!({ "degraded": "single_file" })),
            );
        }

        match self.prepare_plate(request, &plating, workdir).await {
            Ok(payload) => {
                let unit = UnitSpec {
                    filename: COMBINED_PLATE_FILENAME.to_string(),
                    // The combined plate is never re-rotated.
                    allow_rotation: false,
                };
                (vec![unit], Some(payload))
            }
            Err(reason) => {
                warn!(
                    task_id = %request.task_id,
                    reason = %reason,
                    "plating failed; falling back to per-file processing"
                );
                (
                    per_file(request.rotation.enabled),
                    Some(json!({ "fallback_reason": reason })),
                )
            }
        }
    }

    /// Pre-rotate (when enabled), pack, and write the combined plate.
    /// Returns the session `plating_info` payload.
    async fn prepare_plate(
        &self,
        request: &BatchRequest,
        plating: &PlatingConfig,
        workdir: &Path,
    ) -> Result<serde_json::Value, String> {
        let mut named: Vec<(String, Vec<u8>)> = Vec::with_capacity(request.files.len());
        for filename in &request.files {
            let path = safe_join(workdir, filename)?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("cannot read '{filename}': {e}"))?;
            named.push((filename.clone(), bytes));
        }

        // Rotation precedes packing so every piece lies printable on
        // the shared plate.
        if request.rotation.enabled {
            for (filename, bytes) in &mut named {
                match self
                    .slicer
                    .auto_rotate_upload(bytes, filename, &request.rotation)
                    .await
                {
                    Ok((rotated, Some(meta))) if meta.applied => {
                        let rotated_path = workdir.join(format!("rotated_{filename}"));
                        if let Err(e) = tokio::fs::write(&rotated_path, &rotated).await {
                            warn!(file = %filename, error = %e, "cannot persist rotated mesh");
                        }
                        *bytes = rotated;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            file = %filename,
                            error = %e,
                            "pre-pack rotation failed; packing original bytes"
                        );
                    }
                }
            }
        }

        let plating_cfg = plating.clone();
        let profile = request.profile.clone();
        let workdir_owned = workdir.to_path_buf();
        let build = tokio::task::spawn_blocking(move || {
            crate::plating::build_combined_plate(&named, &plating_cfg, &profile, &workdir_owned)
        })
        .await
        .map_err(|e| format!("plating worker crashed: {e}"))??;

        Ok(json!({
            "algorithm": plating.algorithm,
            "spacing": plating.spacing,
            "rotation_applied_first": request.rotation.enabled,
            "original_files": request.files,
            "piece_count": build.piece_count,
            "utilization": build.utilization,
        }))
    }

    /// Process one unit end to end. Never fails the task: the outcome
    /// lands in the returned result.
    async fn run_unit(
        &self,
        unit: &UnitSpec,
        session_id: &str,
        rotation: &RotationConfig,
        profile: &ProfileConfig,
        workdir: &Path,
    ) -> FileProcessingResult {
        let started = Instant::now();
        let mut result = FileProcessingResult::new(&unit.filename);
        match self
            .run_unit_inner(unit, session_id, rotation, profile, workdir, &mut result)
            .await
        {
            Ok(()) => result.success = true,
            Err(message) => {
                warn!(file = %unit.filename, error = %message, "unit failed");
                result.success = false;
                result.error = Some(message);
            }
        }
        result.processing_time_s = started.elapsed().as_secs_f64();
        result
    }

    async fn run_unit_inner(
        &self,
        unit: &UnitSpec,
        session_id: &str,
        rotation: &RotationConfig,
        profile: &ProfileConfig,
        workdir: &Path,
        result: &mut FileProcessingResult,
    ) -> Result<(), String> {
        let path = safe_join(workdir, &unit.filename)?;
        let mut bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("cannot read mesh file: {e}"))?;

        // 3MF units become triangle-mesh bytes before they travel.
        if MeshFormat::sniff(&bytes) == MeshFormat::ThreeMf {
            bytes = tokio::task::spawn_blocking(move || mesh_io::three_mf_to_stl_bytes(&bytes))
                .await
                .map_err(|e| format!("conversion worker crashed: {e}"))?
                .map_err(|e| format!("3MF conversion failed: {e}"))?;
        }

        if unit.allow_rotation {
            match self
                .slicer
                .auto_rotate_upload(&bytes, &unit.filename, rotation)
                .await
            {
                Ok((rotated, Some(meta))) if meta.applied => {
                    let rotated_path = workdir.join(format!("rotated_{}", unit.filename));
                    if let Err(e) = tokio::fs::write(&rotated_path, &rotated).await {
                        warn!(
                            file = %unit.filename,
                            error = %e,
                            "cannot persist rotated mesh; continuing with in-memory bytes"
                        );
                    }
                    bytes = rotated;
                    result.rotated = true;
                    result.rotation_info = Some(meta);
                }
                Ok((_, meta)) => {
                    // Below threshold or no metadata: original bytes.
                    result.rotation_info = meta;
                }
                Err(e) => {
                    warn!(
                        file = %unit.filename,
                        error = %e,
                        "rotation failed; slicing original bytes"
                    );
                }
            }
        }

        let gcode = self
            .slicer
            .slice(&bytes, &unit.filename, profile)
            .await
            .map_err(|e| e.to_string())?;

        let gcode_path = workdir.join(format!("gcode_{}_{}.gcode", session_id, unit.filename));
        tokio::fs::write(&gcode_path, &gcode)
            .await
            .map_err(|e| format!("cannot write G-code: {e}"))?;

        result.gcode_path = Some(gcode_path.display().to_string());
        result.gcode_size = Some(gcode.len() as u64);
        Ok(())
    }

    /// Write the `stl_processing` summary into the session and advance
    /// the wizard. Runs only on completed tasks.
    async fn finalize_session(
        &self,
        request: &BatchRequest,
        plating_info: Option<serde_json::Value>,
    ) {
        let Some(task) = self.registry.get(&request.task_id).await else {
            return;
        };
        if task.status != TaskState::Completed {
            return;
        }

        let successful: Vec<String> = task
            .results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.filename.clone())
            .collect();
        let failed: Vec<String> = task
            .results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.filename.clone())
            .collect();
        let gcode_files: Vec<String> = task
            .results
            .iter()
            .filter_map(|r| r.gcode_path.clone())
            .collect();
        let payload = json!({
            "task_id": request.task_id,
            "successful": successful,
            "failed": failed,
            "gcode_files": gcode_files,
        });

        let update = self
            .sessions
            .update(
                &request.session_id,
                Box::new(move |session| {
                    session.set_step_payload("stl_processing", payload);
                    if let Some(info) = plating_info {
                        session.set_step_payload("plating_info", info);
                    }
                    session.complete_step("stl_processing", "validation");
                }),
            )
            .await;
        if let Err(e) = update {
            warn!(
                session_id = %request.session_id,
                error = %e,
                "cannot record stl_processing step in session"
            );
        }
    }

    async fn fail_task(&self, task_id: &str, message: String) {
        error!(task_id, message = %message, "task failed during setup");
        let _ = self
            .registry
            .mutate(task_id, |task| {
                task.start();
                task.error_message = Some(message);
                task.finish(TaskState::Failed);
            })
            .await;
    }
}

/// Join a user-supplied filename onto the working directory, rejecting
/// anything that could escape it.
fn safe_join(workdir: &Path, filename: &str) -> Result<PathBuf, String> {
    if filename.is_empty() || filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(format!("invalid filename '{filename}'"));
    }
    Ok(workdir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use farmhand_core::types::{RotationInfo, WizardSession};
    use farmhand_slicer::{RetryPolicy, Retrying, SlicerError, SlicerResult};
    use nalgebra::Point3;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const SESSION: &str = "sess-1";
    const GCODE: &[u8] = b"G28\nG1 X10 Y10 E5\n";

    #[derive(Clone)]
    enum RotateMode {
        NotApplied,
        /// Prefix the bytes so the slice payload is distinguishable.
        AppliedTagged(RotationInfo),
        /// Return the bytes unchanged (keeps them a valid mesh).
        AppliedIdentity(RotationInfo),
        Fails,
    }

    struct MockSlicer {
        rotate_mode: RotateMode,
        slice_errors: StdMutex<VecDeque<SlicerError>>,
        slice_delay: Duration,
        rotate_calls: AtomicUsize,
        slice_calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        sliced_payloads: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockSlicer {
        fn new(rotate_mode: RotateMode) -> Self {
            Self {
                rotate_mode,
                slice_errors: StdMutex::new(VecDeque::new()),
                slice_delay: Duration::ZERO,
                rotate_calls: AtomicUsize::new(0),
                slice_calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                sliced_payloads: StdMutex::new(Vec::new()),
            }
        }

        fn with_slice_errors(self, errors: Vec<SlicerError>) -> Self {
            *self.slice_errors.lock().unwrap() = errors.into();
            self
        }

        fn with_slice_delay(mut self, delay: Duration) -> Self {
            self.slice_delay = delay;
            self
        }

        fn payload_for(&self, filename: &str) -> Option<Vec<u8>> {
            self.sliced_payloads
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == filename)
                .map(|(_, bytes)| bytes.clone())
        }
    }

    fn applied_meta() -> RotationInfo {
        RotationInfo {
            applied: true,
            degrees: [90.0, 0.0, 0.0],
            improvement_pct: 17.2,
            contact_area: 482.5,
            original_area: 411.7,
        }
    }

    #[async_trait]
    impl SlicerGateway for MockSlicer {
        async fn auto_rotate_upload(
            &self,
            file: &[u8],
            _filename: &str,
            _config: &RotationConfig,
        ) -> SlicerResult<(Vec<u8>, Option<RotationInfo>)> {
            self.rotate_calls.fetch_add(1, Ordering::SeqCst);
            match &self.rotate_mode {
                RotateMode::NotApplied => Ok((
                    file.to_vec(),
                    Some(RotationInfo {
                        applied: false,
                        degrees: [0.0; 3],
                        improvement_pct: 1.2,
                        contact_area: 100.0,
                        original_area: 100.0,
                    }),
                )),
                RotateMode::AppliedTagged(meta) => {
                    let mut rotated = b"ROT:".to_vec();
                    rotated.extend_from_slice(file);
                    Ok((rotated, Some(meta.clone())))
                }
                RotateMode::AppliedIdentity(meta) => Ok((file.to_vec(), Some(meta.clone()))),
                RotateMode::Fails => Err(SlicerError::Transport("connection reset".into())),
            }
        }

        async fn slice(
            &self,
            file: &[u8],
            filename: &str,
            _profile: &ProfileConfig,
        ) -> SlicerResult<Vec<u8>> {
            self.slice_calls.fetch_add(1, Ordering::SeqCst);

            let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(in_flight, Ordering::SeqCst);
            if !self.slice_delay.is_zero() {
                tokio::time::sleep(self.slice_delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.slice_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.sliced_payloads
                .lock()
                .unwrap()
                .push((filename.to_string(), file.to_vec()));
            Ok(GCODE.to_vec())
        }
    }

    fn sample_stl(size: f64) -> Vec<u8> {
        let mesh = farmhand_geometry::Mesh::from_parts(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(size, 0.0, 0.0),
                Point3::new(0.0, size, 0.0),
                Point3::new(0.0, 0.0, size),
            ],
            vec![[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]],
        );
        mesh_io::stl_bytes(&mesh).unwrap()
    }

    struct TestEnv {
        _dir: tempfile::TempDir,
        registry: Arc<TaskRegistry>,
        sessions: Arc<JsonSessionStore>,
        workdir: PathBuf,
    }

    async fn env_with_files(files: &[(&str, Vec<u8>)]) -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(JsonSessionStore::new(dir.path()).unwrap());
        sessions
            .save(&WizardSession::new(SESSION, "proj-1"))
            .await
            .unwrap();
        let workdir = sessions.session_workdir(SESSION).unwrap();
        for (name, bytes) in files {
            std::fs::write(workdir.join(name), bytes).unwrap();
        }
        TestEnv {
            _dir: dir,
            registry: Arc::new(TaskRegistry::new()),
            sessions,
            workdir,
        }
    }

    fn orchestrator(
        env: &TestEnv,
        slicer: Arc<dyn SlicerGateway>,
        max_concurrent: usize,
    ) -> Arc<BatchOrchestrator> {
        Arc::new(BatchOrchestrator::with_max_concurrent(
            env.registry.clone(),
            env.sessions.clone(),
            slicer,
            max_concurrent,
        ))
    }

    fn request(files: &[&str], rotation_enabled: bool, plating: Option<PlatingConfig>) -> BatchRequest {
        BatchRequest {
            task_id: "task-1".to_string(),
            session_id: SESSION.to_string(),
            files: files.iter().map(|s| s.to_string()).collect(),
            rotation: RotationConfig {
                enabled: rotation_enabled,
                ..Default::default()
            },
            profile: ProfileConfig {
                job_id: "prof-1".to_string(),
                bed_size: (220.0, 220.0),
            },
            plating,
        }
    }

    #[test]
    fn test_pure_slice_three_files() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[
                ("a.stl", stl.clone()),
                ("b.stl", stl.clone()),
                ("c.stl", stl.clone()),
            ])
            .await;
            let slicer = Arc::new(
                MockSlicer::new(RotateMode::NotApplied)
                    .with_slice_delay(Duration::from_millis(20)),
            );
            let orch = orchestrator(&env, slicer.clone(), 2);

            orch.clone()
                .process_batch(request(&["a.stl", "b.stl", "c.stl"], false, None))
                .await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.total_files, 3);
            assert_eq!(task.progress.completed, 3);
            assert_eq!(task.progress.failed, 0);
            assert_eq!(task.progress.in_progress, 0);
            assert!(task.errors.is_empty());
            assert_eq!(task.results.len(), 3);
            assert!((task.progress.percentage() - 100.0).abs() < 1e-9);

            // Rotation was off: the gateway never saw a rotate call.
            assert_eq!(slicer.rotate_calls.load(Ordering::SeqCst), 0);
            assert!(slicer.peak.load(Ordering::SeqCst) <= 2);

            for name in ["a.stl", "b.stl", "c.stl"] {
                let gcode_path = env.workdir.join(format!("gcode_{SESSION}_{name}.gcode"));
                assert_eq!(std::fs::read(gcode_path).unwrap(), GCODE);
            }
        });
    }

    #[test]
    fn test_rotation_applied_above_threshold() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("cube_tilted.stl", stl.clone())]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::AppliedTagged(applied_meta())));
            let orch = orchestrator(&env, slicer.clone(), 3);

            orch.clone()
                .process_batch(request(&["cube_tilted.stl"], true, None))
                .await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            let result = &task.results[0];
            assert!(result.success);
            assert!(result.rotated);
            let info = result.rotation_info.as_ref().unwrap();
            assert!((info.improvement_pct - 17.2).abs() < 1e-9);

            // The sliced payload is exactly what the rotate endpoint
            // returned.
            let mut expected = b"ROT:".to_vec();
            expected.extend_from_slice(&stl);
            assert_eq!(slicer.payload_for("cube_tilted.stl").unwrap(), expected);

            // The rotated mesh was persisted alongside the original.
            assert_eq!(
                std::fs::read(env.workdir.join("rotated_cube_tilted.stl")).unwrap(),
                expected
            );
        });
    }

    #[test]
    fn test_plating_rotates_then_packs_then_slices_once() {
        tokio_test::block_on(async {
            let stl = sample_stl(30.0);
            let files: Vec<(&str, Vec<u8>)> = vec![
                ("p1.stl", stl.clone()),
                ("p2.stl", stl.clone()),
                ("p3.stl", stl.clone()),
                ("p4.stl", stl.clone()),
            ];
            let env = env_with_files(&files).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::AppliedIdentity(applied_meta())));
            let orch = orchestrator(&env, slicer.clone(), 3);

            orch.clone()
                .process_batch(request(
                    &["p1.stl", "p2.stl", "p3.stl", "p4.stl"],
                    true,
                    Some(PlatingConfig {
                        enabled: true,
                        ..Default::default()
                    }),
                ))
                .await;

            // Four rotation calls, one slice call, one combined unit.
            assert_eq!(slicer.rotate_calls.load(Ordering::SeqCst), 4);
            assert_eq!(slicer.slice_calls.load(Ordering::SeqCst), 1);

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.total_files, 1);
            assert_eq!(task.progress.completed, 1);
            assert_eq!(task.results.len(), 1);
            assert_eq!(task.results[0].filename, COMBINED_PLATE_FILENAME);
            assert!(env.workdir.join(COMBINED_PLATE_FILENAME).exists());

            let session = env.sessions.load(SESSION).await.unwrap();
            let info = &session.steps["plating_info"];
            assert_eq!(info["rotation_applied_first"], serde_json::json!(true));
            assert_eq!(info["original_files"].as_array().unwrap().len(), 4);
            assert_eq!(session.current_step, "validation");
            assert!(session
                .completed_steps
                .contains(&"stl_processing".to_string()));
        });
    }

    #[test]
    fn test_transient_slicer_failure_then_recovery() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("a.stl", stl)]).await;
            let mock = MockSlicer::new(RotateMode::NotApplied).with_slice_errors(vec![
                SlicerError::Transient {
                    status: 503,
                    detail: "busy".into(),
                },
                SlicerError::Transient {
                    status: 503,
                    detail: "busy".into(),
                },
            ]);
            let mock = Arc::new(mock);
            let gateway = Arc::new(Retrying::new(mock.clone(), RetryPolicy {
                max_attempts: 3,
                delay: Duration::ZERO,
            }));
            let orch = orchestrator(&env, gateway, 3);

            orch.clone().process_batch(request(&["a.stl"], false, None)).await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.completed, 1);
            assert_eq!(task.progress.failed, 0);
            assert_eq!(mock.slice_calls.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn test_permanent_slicer_failure_fails_unit_only() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("a.stl", stl)]).await;
            let mock = Arc::new(MockSlicer::new(RotateMode::NotApplied).with_slice_errors(vec![
                SlicerError::Permanent {
                    status: 400,
                    detail: "unsupported mesh".into(),
                },
            ]));
            let gateway = Arc::new(Retrying::new(mock.clone(), RetryPolicy {
                max_attempts: 3,
                delay: Duration::ZERO,
            }));
            let orch = orchestrator(&env, gateway, 3);

            orch.clone().process_batch(request(&["a.stl"], false, None)).await;

            let task = env.registry.get("task-1").await.unwrap();
            // A failed unit still completes the task.
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.failed, 1);
            assert!(task.errors[0].starts_with("a.stl"));
            assert!(!task.results[0].success);
            // 4xx is not retried.
            assert_eq!(mock.slice_calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_empty_batch_completes_immediately() {
        tokio_test::block_on(async {
            let env = env_with_files(&[]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::NotApplied));
            let orch = orchestrator(&env, slicer, 3);

            orch.clone().process_batch(request(&[], false, None)).await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert!(task.results.is_empty());
            assert_eq!(task.progress.percentage(), 100.0);
        });
    }

    #[test]
    fn test_missing_session_fails_task() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let env = TestEnv {
                workdir: dir.path().join("unused"),
                sessions: Arc::new(JsonSessionStore::new(dir.path()).unwrap()),
                registry: Arc::new(TaskRegistry::new()),
                _dir: dir,
            };
            let slicer = Arc::new(MockSlicer::new(RotateMode::NotApplied));
            let orch = orchestrator(&env, slicer, 3);

            let mut req = request(&["a.stl"], false, None);
            req.session_id = "ghost".to_string();
            orch.clone().process_batch(req).await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Failed);
            assert!(task.error_message.as_ref().unwrap().contains("ghost"));
            assert!(task.results.is_empty());
        });
    }

    #[test]
    fn test_missing_file_fails_unit_but_not_siblings() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("present.stl", stl)]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::NotApplied));
            let orch = orchestrator(&env, slicer, 3);

            orch.clone()
                .process_batch(request(&["absent.stl", "present.stl"], false, None))
                .await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.completed, 1);
            assert_eq!(task.progress.failed, 1);
            assert!(task.errors.iter().any(|e| e.starts_with("absent.stl")));
        });
    }

    #[test]
    fn test_rotation_failure_degrades_to_original_bytes() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("a.stl", stl.clone())]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::Fails));
            let orch = orchestrator(&env, slicer.clone(), 3);

            orch.clone().process_batch(request(&["a.stl"], true, None)).await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            let result = &task.results[0];
            assert!(result.success);
            assert!(!result.rotated);
            // Fallback safety: the sliced bytes are byte-identical to
            // the input mesh.
            assert_eq!(slicer.payload_for("a.stl").unwrap(), stl);
        });
    }

    #[test]
    fn test_plating_failure_falls_back_to_per_file() {
        tokio_test::block_on(async {
            // 250 mm pieces cannot be packed on a 220 mm bed.
            let stl = sample_stl(250.0);
            let env = env_with_files(&[("big1.stl", stl.clone()), ("big2.stl", stl)]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::NotApplied));
            let orch = orchestrator(&env, slicer.clone(), 3);

            orch.clone()
                .process_batch(request(
                    &["big1.stl", "big2.stl"],
                    false,
                    Some(PlatingConfig {
                        enabled: true,
                        ..Default::default()
                    }),
                ))
                .await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.progress.total_files, 2);
            assert_eq!(task.results.len(), 2);
            assert_eq!(slicer.slice_calls.load(Ordering::SeqCst), 2);

            let session = env.sessions.load(SESSION).await.unwrap();
            assert!(session.steps["plating_info"]["fallback_reason"].is_string());
        });
    }

    #[test]
    fn test_plating_single_file_degrades_quietly() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let env = env_with_files(&[("only.stl", stl)]).await;
            let slicer = Arc::new(MockSlicer::new(RotateMode::NotApplied));
            let orch = orchestrator(&env, slicer.clone(), 3);

            orch.clone()
                .process_batch(request(
                    &["only.stl"],
                    false,
                    Some(PlatingConfig {
                        enabled: true,
                        ..Default::default()
                    }),
                ))
                .await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.status, TaskState::Completed);
            assert_eq!(task.results.len(), 1);
            assert_eq!(task.results[0].filename, "only.stl");
        });
    }

    #[test]
    fn test_concurrency_stays_under_semaphore() {
        tokio_test::block_on(async {
            let stl = sample_stl(10.0);
            let files: Vec<(String, Vec<u8>)> = (0..6)
                .map(|i| (format!("f{i}.stl"), stl.clone()))
                .collect();
            let refs: Vec<(&str, Vec<u8>)> = files
                .iter()
                .map(|(n, b)| (n.as_str(), b.clone()))
                .collect();
            let env = env_with_files(&refs).await;
            let slicer = Arc::new(
                MockSlicer::new(RotateMode::NotApplied)
                    .with_slice_delay(Duration::from_millis(30)),
            );
            let orch = orchestrator(&env, slicer.clone(), 2);

            let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
            orch.clone().process_batch(request(&names, false, None)).await;

            let task = env.registry.get("task-1").await.unwrap();
            assert_eq!(task.progress.completed, 6);
            let peak = slicer.peak.load(Ordering::SeqCst);
            assert!(peak <= 2, "peak concurrency {peak} exceeded the semaphore");
            assert!(peak >= 2, "expected the semaphore to be saturated");
        });
    }
}
