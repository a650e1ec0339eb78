//! HTTP slicer client and the retry wrapper shared by both endpoints.

use std::time::Duration;

use async_trait::async_trait;
use farmhand_core::config::{OrientationMethod, ProfileConfig, RotationConfig};
use farmhand_core::types::RotationInfo;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use tokio::time::sleep;
use tracing::warn;

use crate::error::{SlicerError, SlicerResult};

/// Per-attempt wall clock for the rotate endpoint.
const ROTATE_TIMEOUT: Duration = Duration::from_secs(120);
/// Per-attempt wall clock for the slice endpoint.
const SLICE_TIMEOUT: Duration = Duration::from_secs(180);

/// Seam between the orchestrator and the slicer service.
#[async_trait]
pub trait SlicerGateway: Send + Sync {
    /// Upload mesh bytes for printability rotation. Returns the
    /// (possibly rotated) bytes plus rotation metadata when the server
    /// provided a usable header set.
    async fn auto_rotate_upload(
        &self,
        file: &[u8],
        filename: &str,
        config: &RotationConfig,
    ) -> SlicerResult<(Vec<u8>, Option<RotationInfo>)>;

    /// Slice mesh bytes with a pre-registered profile; returns G-code.
    async fn slice(
        &self,
        file: &[u8],
        filename: &str,
        profile: &ProfileConfig,
    ) -> SlicerResult<Vec<u8>>;
}

#[async_trait]
impl<G: SlicerGateway + ?Sized> SlicerGateway for std::sync::Arc<G> {
    async fn auto_rotate_upload(
        &self,
        file: &[u8],
        filename: &str,
        config: &RotationConfig,
    ) -> SlicerResult<(Vec<u8>, Option<RotationInfo>)> {
        (**self).auto_rotate_upload(file, filename, config).await
    }

    async fn slice(
        &self,
        file: &[u8],
        filename: &str,
        profile: &ProfileConfig,
    ) -> SlicerResult<Vec<u8>> {
        (**self).slice(file, filename, profile).await
    }
}

/// Retry policy shared by both gateway operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Decorator adding bounded retries to any gateway. Transport faults
/// and 5xx responses are retried with a fixed delay; 4xx surfaces
/// immediately. Exhaustion wraps the last cause.
pub struct Retrying<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> Retrying<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            delay: policy.delay,
        };
        Self { inner, policy }
    }
}

macro_rules! retry_loop {
    ($self:expr, $operation:literal, $call:expr) => {{
        let mut last: Option<SlicerError> = None;
        for attempt in 1..=$self.policy.max_attempts {
            match $call.await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    warn!(
                        operation = $operation,
                        attempt,
                        max_attempts = $self.policy.max_attempts,
                        error = %err,
                        "slicer attempt failed; will retry"
                    );
                    last = Some(err);
                    if attempt < $self.policy.max_attempts && !$self.policy.delay.is_zero() {
                        sleep($self.policy.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(SlicerError::Exhausted {
            attempts: $self.policy.max_attempts,
            cause: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }};
}

#[async_trait]
impl<G: SlicerGateway> SlicerGateway for Retrying<G> {
    async fn auto_rotate_upload(
        &self,
        file: &[u8],
        filename: &str,
        config: &RotationConfig,
    ) -> SlicerResult<(Vec<u8>, Option<RotationInfo>)> {
        retry_loop!(
            self,
            "auto_rotate_upload",
            self.inner.auto_rotate_upload(file, filename, config)
        )
    }

    async fn slice(
        &self,
        file: &[u8],
        filename: &str,
        profile: &ProfileConfig,
    ) -> SlicerResult<Vec<u8>> {
        retry_loop!(self, "slice", self.inner.slice(file, filename, profile))
    }
}

/// Single-attempt HTTP transport; compose with [`Retrying`] for the
/// production retry discipline.
pub struct HttpSlicerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSlicerClient {
    /// Create a client against a slicer base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn rotate_form(file: &[u8], filename: &str, config: &RotationConfig) -> Form {
        let method = match config.method {
            OrientationMethod::Auto => "auto",
            OrientationMethod::Gradient => "gradient",
            OrientationMethod::Grid => "grid",
        };
        Form::new()
            .part(
                "file",
                Part::bytes(file.to_vec()).file_name(filename.to_string()),
            )
            .text("method", method)
            .text(
                "improvement_threshold",
                config.improvement_threshold.to_string(),
            )
            .text("max_iterations", config.max_iterations.to_string())
            .text("learning_rate", config.learning_rate.to_string())
            .text("rotation_step", config.rotation_step.to_string())
            .text("max_rotations", config.max_rotations.to_string())
    }

    fn slice_form(file: &[u8], filename: &str, profile: &ProfileConfig) -> Form {
        Form::new()
            .part(
                "file",
                Part::bytes(file.to_vec()).file_name(filename.to_string()),
            )
            .text("custom_profile", profile.job_id.clone())
    }

    /// Send one request and sort the response into the error taxonomy.
    /// Error bodies carry the slicer's human-readable detail line.
    async fn dispatch(&self, request: reqwest::RequestBuilder) -> SlicerResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SlicerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let detail = if detail.trim().is_empty() {
            status.to_string()
        } else {
            detail
        };
        if status.is_server_error() {
            Err(SlicerError::Transient {
                status: status.as_u16(),
                detail,
            })
        } else {
            Err(SlicerError::Permanent {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

#[async_trait]
impl SlicerGateway for HttpSlicerClient {
    async fn auto_rotate_upload(
        &self,
        file: &[u8],
        filename: &str,
        config: &RotationConfig,
    ) -> SlicerResult<(Vec<u8>, Option<RotationInfo>)> {
        let url = format!("{}/auto-rotate-upload", self.base_url);
        let response = self
            .dispatch(
                self.http
                    .post(&url)
                    .timeout(ROTATE_TIMEOUT)
                    .multipart(Self::rotate_form(file, filename, config)),
            )
            .await?;

        let meta = parse_rotation_headers(response.headers());
        if meta.is_none() {
            warn!(filename, "rotate response carried no usable rotation metadata");
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SlicerError::Transport(e.to_string()))?;
        Ok((bytes.to_vec(), meta))
    }

    async fn slice(
        &self,
        file: &[u8],
        filename: &str,
        profile: &ProfileConfig,
    ) -> SlicerResult<Vec<u8>> {
        let url = format!("{}/slice", self.base_url);
        let response = self
            .dispatch(
                self.http
                    .post(&url)
                    .timeout(SLICE_TIMEOUT)
                    .multipart(Self::slice_form(file, filename, profile)),
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SlicerError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Decode the `X-Rotation-*` metadata headers. A missing or unparsable
/// set yields None; the caller degrades to "rotation not applied".
fn parse_rotation_headers(headers: &HeaderMap) -> Option<RotationInfo> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let applied = match text("X-Rotation-Applied")?.to_ascii_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => return None,
    };
    let degrees: [f64; 3] = serde_json::from_str::<Vec<f64>>(text("X-Rotation-Degrees")?)
        .ok()?
        .try_into()
        .ok()?;
    let improvement_pct = text("X-Improvement-Percentage")?.parse().ok()?;
    let contact_area = text("X-Contact-Area")?.parse().ok()?;
    let original_area = text("X-Original-Area")?.parse().ok()?;

    Some(RotationInfo {
        applied,
        degrees,
        improvement_pct,
        contact_area,
        original_area,
    })
}
