//! Error taxonomy shared across the workspace.
//!
//! Every crate keeps its own thiserror enum; this module defines the
//! coarse kinds those errors map into so the HTTP surface and the task
//! log can speak one language.

use serde::{Deserialize, Serialize};

/// Coarse error categories.
///
/// The kind decides retry and propagation behaviour:
/// - `Input` and `UpstreamPermanent` are never retried
/// - `UpstreamTransient` is retried per policy, then degrades
/// - `Resource` fails the affected unit, not the task
/// - `Invariant` rejects the offending result and falls back
/// - `Shutdown` abandons in-flight work without recording successes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    UpstreamTransient,
    UpstreamPermanent,
    Resource,
    Invariant,
    Shutdown,
}

impl ErrorKind {
    /// Short category string surfaced to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::UpstreamTransient => "upstream_transient",
            Self::UpstreamPermanent => "upstream_permanent",
            Self::Resource => "resource",
            Self::Invariant => "invariant",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether a retry may resolve this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every crate error so callers can branch on the kind
/// without knowing the concrete type.
pub trait Categorize {
    /// The taxonomy kind of this error.
    fn kind(&self) -> ErrorKind;

    /// One-line user-visible message, prefixed with the category.
    fn user_message(&self) -> String
    where
        Self: std::fmt::Display,
    {
        format!("{}: {}", self.kind(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorKind::UpstreamTransient.is_retryable());
        assert!(!ErrorKind::Input.is_retryable());
        assert!(!ErrorKind::UpstreamPermanent.is_retryable());
        assert!(!ErrorKind::Resource.is_retryable());
        assert!(!ErrorKind::Invariant.is_retryable());
        assert!(!ErrorKind::Shutdown.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UpstreamTransient).unwrap();
        assert_eq!(json, "\"upstream_transient\"");
    }
}
