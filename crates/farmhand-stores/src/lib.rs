//! # Farmhand Stores
//!
//! Process-local state behind linearizable-per-key interfaces:
//! - `SessionStore`: wizard session JSON documents with atomic
//!   read-modify-write per session id
//! - `TaskRegistry`: live task status with snapshot reads and a
//!   bounded-retention sweeper

mod session_store;
mod task_registry;

pub use session_store::{JsonSessionStore, SessionStore};
pub use task_registry::TaskRegistry;

use farmhand_core::error::{Categorize, ErrorKind};
use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key '{0}': must be a plain identifier")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Categorize for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::InvalidKey(_) => ErrorKind::Input,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Resource,
        }
    }
}
