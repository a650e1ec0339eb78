//! # Farmhand Core
//!
//! Shared domain types for the farmhand print-job orchestrator.
//!
//! This crate contains:
//! - Task status / progress / per-file result types
//! - Printer and fleet data model
//! - Wizard session document
//! - Pipeline configuration structs (rotation, plating, profile)
//! - The error taxonomy shared by all crates
//!
//! This crate does NOT care about:
//! - How tasks are executed
//! - Where sessions are persisted
//! - What transport carries printer updates

pub mod config;
pub mod error;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{
        OrientationMethod, PackingAlgorithm, PlatingConfig, ProfileConfig, RotationConfig,
    };
    pub use crate::error::{Categorize, ErrorKind};
    pub use crate::types::{
        FileProcessingResult, Printer, PrinterStatus, RealtimeData, RotationInfo, TaskProgress,
        TaskState, TaskStatus, Temperatures, WizardSession,
    };
}

pub use config::{OrientationMethod, PackingAlgorithm, PlatingConfig, ProfileConfig, RotationConfig};
pub use error::{Categorize, ErrorKind};
pub use types::{
    FileProcessingResult, Printer, PrinterStatus, RealtimeData, RotationInfo, TaskProgress,
    TaskState, TaskStatus, Temperatures, WizardSession,
};

/// Filename of the temporary combined plate written by the plating path.
pub const COMBINED_PLATE_FILENAME: &str = "combined_plating.stl";
