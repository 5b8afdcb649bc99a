use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// `adapters.yaml`: `{ adapters: { name: { ... } } }`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AdaptersFile {
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdapterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How the subprocess is launched: `["python3", "-m", "adapters.discord"]`.
    pub module: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_restart_policy")]
    pub restart_policy: RestartPolicy,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_reset_window_secs")]
    pub reset_window_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_restart_policy() -> RestartPolicy {
    RestartPolicy::OnFailure
}
fn default_restart_delay_secs() -> u64 {
    2
}
fn default_max_restarts() -> u32 {
    5
}
fn default_reset_window_secs() -> u64 {
    300
}

/// `hooks.yaml`: `{ hooks: [ {...}, ... ] }`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HooksFile {
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookConfig {
    pub name: String,
    pub event: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_hook_timeout_secs() -> u64 {
    30
}

/// `scheduler.yaml`: `{ tasks: [ {...}, ... ] }`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SchedulerFile {
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    OneShot,
    Interval,
    Cron,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub command: Option<String>,
    /// Interval in seconds, for `TaskKind::Interval`.
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Five-field cron expression, for `TaskKind::Cron`.
    #[serde(default)]
    pub cron: Option<String>,
    /// Delay in seconds before the first (and only) run, for `TaskKind::OneShot`.
    #[serde(default)]
    pub delay_secs: Option<u64>,
    #[serde(default = "default_task_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_task_timeout_secs() -> u64 {
    60
}

pub fn load_yaml<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
