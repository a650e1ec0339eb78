//! Slicer gateway error types.

use farmhand_core::error::{Categorize, ErrorKind};
use thiserror::Error;

/// Result type alias for gateway operations.
pub type SlicerResult<T> = Result<T, SlicerError>;

/// Gateway error types.
#[derive(Debug, Error)]
pub enum SlicerError {
    /// Connection refused, reset, DNS failure, or per-attempt timeout.
    #[error("slicer transport error: {0}")]
    Transport(String),

    /// HTTP 5xx from the slicer.
    #[error("slicer failure ({status}): {detail}")]
    Transient { status: u16, detail: String },

    /// HTTP 4xx from the slicer; never retried.
    #[error("slicer rejected request ({status}): {detail}")]
    Permanent { status: u16, detail: String },

    /// Retry budget spent; carries the last underlying cause.
    #[error("slicer retries exhausted after {attempts} attempt(s): {cause}")]
    Exhausted { attempts: u32, cause: String },
}

impl SlicerError {
    /// Whether the retry loop may try again on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Transient { .. })
    }
}

impl Categorize for SlicerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Transient { .. } | Self::Exhausted { .. } => {
                ErrorKind::UpstreamTransient
            }
            Self::Permanent { .. } => ErrorKind::UpstreamPermanent,
        }
    }
}
