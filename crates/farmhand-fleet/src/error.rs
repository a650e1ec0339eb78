//! Fleet error types.

use farmhand_core::error::{Categorize, ErrorKind};
use thiserror::Error;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Fleet error types.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("printer not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out contacting printer")]
    Timeout,

    #[error("controller error ({status}): {detail}")]
    Controller { status: u16, detail: String },

    #[error("invalid controller response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl Categorize for FleetError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::Input,
            Self::Transport(_) | Self::Timeout => ErrorKind::UpstreamTransient,
            Self::Controller { status, .. } if *status >= 500 => ErrorKind::UpstreamTransient,
            Self::Controller { .. } | Self::InvalidResponse(_) => ErrorKind::UpstreamPermanent,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Resource,
        }
    }
}
