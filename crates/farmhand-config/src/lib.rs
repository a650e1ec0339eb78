//! # Farmhand Config
//!
//! YAML configuration for the server binary, with environment-variable
//! overrides for the orchestrator knobs:
//! - `ROTATION_WORKER_POOL_SIZE` → `orchestrator.max_concurrent`
//! - `ROTATION_MAX_RETRIES` → `slicer.max_retries`
//! - `ROTATION_RETRY_DELAY` (seconds) → `slicer.retry_delay_secs`

mod loader;

pub use loader::{load_config, ConfigError};

use serde::Deserialize;

/// Full server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FarmConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slicer: SlicerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlicerConfig {
    #[serde(default = "default_slicer_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_slicer_url() -> String {
    "http://127.0.0.1:8585".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            base_url: default_slicer_url(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_sessions_root")]
    pub root_dir: String,
}

fn default_sessions_root() -> String {
    "data/sessions".to_string()
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            root_dir: default_sessions_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
}

fn default_registry_path() -> String {
    "data/printers.json".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_update_interval() -> u64 {
    5
}

fn default_heartbeat() -> u64 {
    60
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}
