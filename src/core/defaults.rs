use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::paths;
use crate::utils::io;

/// Root configuration structure for jobline.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JoblineConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via jobline.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_capture")]
    pub capture: CaptureConfig,

    #[serde(default = "default_executor")]
    pub executor: ExecutorConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            capture: default_capture(),
            executor: default_executor(),
            storage: default_storage(),
        }
    }
}

/// What to do when a step's delimiters are not found in its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDelimiter {
    /// Treat as a capture failure; the job fails.
    #[default]
    Fail,
    /// Hand an empty excerpt to the next step.
    Empty,
}

/// Configuration for step output capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Directory holding content-addressed artifact files. `~` is expanded.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,

    #[serde(default)]
    pub missing_delimiter: MissingDelimiter,
}

impl CaptureConfig {
    pub fn artifact_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.artifact_root).into_owned())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        default_capture()
    }
}

/// Configuration for the container executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_remove_containers")]
    pub remove_containers: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        default_executor()
    }
}

/// Configuration for job persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// SQLite database file. Defaults to `jobs.db` next to jobline.json.
    /// Serialized as `null` when unset.
    #[serde(default)]
    pub database: Option<String>,
}

impl StorageConfig {
    pub fn database_path(&self) -> crate::Result<PathBuf> {
        match &self.database {
            Some(path) if !path.trim().is_empty() => {
                Ok(PathBuf::from(shellexpand::tilde(path).into_owned()))
            }
            _ => paths::jobs_db(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_capture() -> CaptureConfig {
    CaptureConfig {
        artifact_root: default_artifact_root(),
        missing_delimiter: MissingDelimiter::default(),
    }
}

fn default_artifact_root() -> String {
    std::env::temp_dir().display().to_string()
}

fn default_executor() -> ExecutorConfig {
    ExecutorConfig {
        docker_binary: default_docker_binary(),
        remove_containers: default_remove_containers(),
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_remove_containers() -> bool {
    true
}

fn default_storage() -> StorageConfig {
    StorageConfig { database: None }
}

// =============================================================================
// Public API
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// Returns built-in defaults if no config file exists or if parsing fails.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full jobline.json config.
pub fn load_config() -> JoblineConfig {
    load_config_from_file().unwrap_or_default()
}

fn load_config_from_file() -> crate::Result<JoblineConfig> {
    let path = paths::jobline_json()?;

    if !path.exists() {
        return Err(crate::Error::other("jobline.json not found"));
    }

    let content = io::read_file(&path, &format!("read {}", path.display()))?;

    serde_json::from_str(&content).map_err(|e| {
        crate::Error::validation_invalid_json(e, Some("parse jobline.json".to_string()))
    })
}

/// Save config to jobline.json (creates if missing).
pub fn save_config(config: &JoblineConfig) -> crate::Result<()> {
    let path = paths::jobline_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        crate::Error::internal_json(e.to_string(), Some("serialize jobline.json".to_string()))
    })?;

    io::write_file_atomic(&path, &content, &format!("write {}", path.display()))
}

/// Delete jobline.json, returning whether a file was removed.
pub fn reset_config() -> crate::Result<bool> {
    let path = paths::jobline_json()?;
    if !path.exists() {
        return Ok(false);
    }

    fs::remove_file(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
    })?;
    Ok(true)
}

pub fn config_path() -> crate::Result<String> {
    Ok(paths::jobline_json()?.display().to_string())
}

pub fn config_exists() -> bool {
    paths::jobline_json().map(|p| p.exists()).unwrap_or(false)
}

/// Built-in defaults, ignoring any jobline.json.
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
