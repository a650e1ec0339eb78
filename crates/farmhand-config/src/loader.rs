//! Configuration loading and validation.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::FarmConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid environment override {name}={value}")]
    BadEnvOverride { name: String, value: String },
}

/// Load configuration from a YAML file (defaults when the file is
/// absent), apply environment overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<FarmConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => FarmConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Environment overrides for the orchestrator knobs. Extracted over a
/// lookup function so tests do not mutate the process environment.
fn apply_env_overrides<F>(config: &mut FarmConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("ROTATION_WORKER_POOL_SIZE") {
        config.orchestrator.max_concurrent =
            value.parse().map_err(|_| ConfigError::BadEnvOverride {
                name: "ROTATION_WORKER_POOL_SIZE".to_string(),
                value: value.clone(),
            })?;
        debug!(max_concurrent = config.orchestrator.max_concurrent, "env override applied");
    }
    if let Some(value) = lookup("ROTATION_MAX_RETRIES") {
        config.slicer.max_retries = value.parse().map_err(|_| ConfigError::BadEnvOverride {
            name: "ROTATION_MAX_RETRIES".to_string(),
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup("ROTATION_RETRY_DELAY") {
        config.slicer.retry_delay_secs =
            value.parse().map_err(|_| ConfigError::BadEnvOverride {
                name: "ROTATION_RETRY_DELAY".to_string(),
                value: value.clone(),
            })?;
    }
    Ok(())
}

fn validate_config(config: &FarmConfig) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "server.listen must not be empty".to_string(),
        ));
    }
    if config.slicer.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "slicer.base_url must not be empty".to_string(),
        ));
    }
    if config.slicer.max_retries == 0 {
        return Err(ConfigError::Invalid(
            "slicer.max_retries must be > 0".to_string(),
        ));
    }
    if config.orchestrator.max_concurrent == 0 {
        return Err(ConfigError::Invalid(
            "orchestrator.max_concurrent must be > 0".to_string(),
        ));
    }
    if config.realtime.update_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "realtime.update_interval_secs must be > 0".to_string(),
        ));
    }
    if config.tasks.retention_hours == 0 {
        return Err(ConfigError::Invalid(
            "tasks.retention_hours must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_no_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.orchestrator.max_concurrent, 3);
        assert_eq!(config.slicer.max_retries, 3);
        assert_eq!(config.slicer.retry_delay_secs, 2);
        assert_eq!(config.realtime.update_interval_secs, 5);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "slicer:\n  base_url: http://slicer.lan:9000\norchestrator:\n  max_concurrent: 6\n"
        )
        .unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.slicer.base_url, "http://slicer.lan:9000");
        assert_eq!(config.orchestrator.max_concurrent, 6);
        assert_eq!(config.tasks.retention_hours, 24);
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = FarmConfig::default();
        apply_env_overrides(&mut config, |name| match name {
            "ROTATION_WORKER_POOL_SIZE" => Some("7".to_string()),
            "ROTATION_MAX_RETRIES" => Some("5".to_string()),
            "ROTATION_RETRY_DELAY" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.orchestrator.max_concurrent, 7);
        assert_eq!(config.slicer.max_retries, 5);
        assert_eq!(config.slicer.retry_delay_secs, 0);
    }

    #[test]
    fn test_bad_env_override_is_rejected() {
        let mut config = FarmConfig::default();
        let result = apply_env_overrides(&mut config, |name| {
            (name == "ROTATION_WORKER_POOL_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::BadEnvOverride { .. })));
    }

    #[test]
    fn test_zero_pool_size_is_invalid() {
        let mut config = FarmConfig::default();
        config.orchestrator.max_concurrent = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
