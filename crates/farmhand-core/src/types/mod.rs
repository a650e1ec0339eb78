//! Domain type definitions.

mod printer;
mod session;
mod task;

pub use printer::{Printer, PrinterStatus, RealtimeData, Temperatures};
pub use session::WizardSession;
pub use task::{FileProcessingResult, RotationInfo, TaskProgress, TaskState, TaskStatus};
