//! Task type definitions.
//!
//! TaskStatus is the live record the orchestrator mutates and the HTTP
//! surface snapshots. Terminal states are sticky.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress counters for a task.
///
/// `completed + failed <= total_files` at all times; both counters are
/// monotone for the lifetime of the task. `percentage` is derived at
/// snapshot time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
pub struct TaskProgress {
    pub total_files: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl Serialize for TaskProgress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("TaskProgress", 5)?;
        state.serialize_field("total_files", &self.total_files)?;
        state.serialize_field("completed", &self.completed)?;
        state.serialize_field("failed", &self.failed)?;
        state.serialize_field("in_progress", &self.in_progress)?;
        state.serialize_field("percentage", &self.percentage())?;
        state.end()
    }
}

impl TaskProgress {
    /// Create counters for a fresh task.
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Default::default()
        }
    }

    /// Settled fraction in percent; 100 for an empty task.
    pub fn percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        (self.completed + self.failed) as f64 / self.total_files as f64 * 100.0
    }

    /// Check if every unit has settled.
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed >= self.total_files
    }
}

/// Rotation outcome attached to a file result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationInfo {
    pub applied: bool,
    /// Euler angles in degrees, applied Z∘Y∘X.
    pub degrees: [f64; 3],
    pub improvement_pct: f64,
    pub contact_area: f64,
    pub original_area: f64,
}

/// Outcome of one processing unit (one file, or the combined plate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingResult {
    pub filename: String,
    pub success: bool,
    pub rotated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_info: Option<RotationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcode_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcode_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_s: f64,
}

impl FileProcessingResult {
    /// Start a result record for a unit; filled in as the unit progresses.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            success: false,
            rotated: false,
            rotation_info: None,
            gcode_path: None,
            gcode_size: None,
            error: None,
            processing_time_s: 0.0,
        }
    }

    /// Record a unit failure with a message.
    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(filename);
        result.error = Some(error.into());
        result
    }
}

/// The live status record for one batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskState,
    pub progress: TaskProgress,
    pub results: Vec<FileProcessingResult>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskStatus {
    /// Create a pending task record.
    pub fn new(
        task_id: impl Into<String>,
        session_id: impl Into<String>,
        total_files: usize,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            status: TaskState::Pending,
            progress: TaskProgress::new(total_files),
            results: Vec::new(),
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Transition into `Processing`. No-op once terminal.
    pub fn start(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskState::Processing;
        self.started_at = Some(Utc::now());
    }

    /// Transition into a terminal state and stamp `completed_at`.
    /// Terminal states are sticky: a second transition is ignored.
    pub fn finish(&mut self, state: TaskState) {
        debug_assert!(state.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = state;
        self.completed_at = Some(Utc::now());
    }

    /// Record a settled unit: append the result and bump the counters.
    pub fn record_result(&mut self, result: FileProcessingResult) {
        if result.success {
            self.progress.completed += 1;
        } else {
            self.progress.failed += 1;
            if let Some(err) = &result.error {
                self.errors.push(format!("{}: {}", result.filename, err));
            }
        }
        self.results.push(result);
    }
}
