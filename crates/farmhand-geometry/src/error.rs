//! Geometry error types.

use farmhand_core::error::{Categorize, ErrorKind};
use thiserror::Error;

/// Result type alias for kernel operations.
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Kernel error types.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {details}")]
    Parse { details: String },

    #[error("Unsupported mesh format{}", extension.as_deref().map(|e| format!(": .{e}")).unwrap_or_default())]
    UnsupportedFormat { extension: Option<String> },

    #[error("Mesh has no vertices or faces")]
    EmptyMesh,

    #[error("Plate layout rejected: {reason}")]
    LayoutRejected { reason: String },

    #[error("Layout invariant violated: {details}")]
    InvariantViolation { details: String },
}

impl GeometryError {
    pub fn parse(details: impl Into<String>) -> Self {
        Self::Parse {
            details: details.into(),
        }
    }

    pub fn layout_rejected(reason: impl Into<String>) -> Self {
        Self::LayoutRejected {
            reason: reason.into(),
        }
    }
}

impl Categorize for GeometryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Resource,
            Self::Parse { .. } | Self::UnsupportedFormat { .. } | Self::EmptyMesh => {
                ErrorKind::Input
            }
            Self::LayoutRejected { .. } | Self::InvariantViolation { .. } => ErrorKind::Invariant,
        }
    }
}
