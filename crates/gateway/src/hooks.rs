//! Hook system: shell commands wired to gateway events, configurable from
//! `hooks.yaml`.
//!
//! Hooks subscribe to an [`EventEmitter`](crate::events::EventEmitter) event
//! type, run with `CLARA_*` environment variables injected from the
//! triggering event, support `${VAR}` substitution in the command string,
//! and keep a bounded execution history.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use clara_config::{HookConfig, HooksFile, load_yaml};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::events::{Event, EventEmitter, EventType};

#[derive(Debug, Clone)]
pub struct HookResult {
    pub hook_name: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub event: EventType,
    pub command: String,
    pub timeout_secs: u64,
    pub working_dir: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub description: Option<String>,
}

fn parse_event(name: &str) -> Option<EventType> {
    Some(match name {
        "gateway_started" => EventType::GatewayStarted,
        "gateway_stopping" => EventType::GatewayStopping,
        "adapter_connected" => EventType::AdapterConnected,
        "adapter_disconnected" => EventType::AdapterDisconnected,
        "adapter_reconnected" => EventType::AdapterReconnected,
        "session_created" => EventType::SessionCreated,
        "session_expired" => EventType::SessionExpired,
        "message_received" => EventType::MessageReceived,
        "message_processed" => EventType::MessageProcessed,
        "tool_executed" => EventType::ToolExecuted,
        "tool_failed" => EventType::ToolFailed,
        "scheduler_task_run" => EventType::SchedulerTaskRun,
        "scheduler_task_failed" => EventType::SchedulerTaskFailed,
        _ => return None,
    })
}

const RESULTS_LIMIT: usize = 100;

struct Inner {
    hooks: HashMap<String, Hook>,
    results: Vec<HookResult>,
}

/// Registers shell hooks against an [`EventEmitter`] and runs them when
/// their event fires.
#[derive(Clone)]
pub struct HookManager {
    emitter: EventEmitter,
    hooks_dir: PathBuf,
    inner: Arc<RwLock<Inner>>,
}

impl HookManager {
    pub fn new(emitter: EventEmitter, hooks_dir: impl Into<PathBuf>) -> Self {
        Self {
            emitter,
            hooks_dir: hooks_dir.into(),
            inner: Arc::new(RwLock::new(Inner {
                hooks: HashMap::new(),
                results: Vec::new(),
            })),
        }
    }

    /// Register `hook`, subscribing it to its event type on the shared
    /// emitter. Registering a hook with an already-used name overwrites the
    /// stored config, but the previous subscription on the emitter can't be
    /// retracted; a stale closure checks `enabled`/presence on every firing
    /// instead.
    pub async fn register(&self, hook: Hook) {
        let mut inner = self.inner.write().await;
        if inner.hooks.contains_key(&hook.name) {
            warn!(hook = %hook.name, "overwriting existing hook");
        }
        let name = hook.name.clone();
        let event_type = hook.event;
        inner.hooks.insert(name.clone(), hook.clone());
        drop(inner);

        let manager = self.clone();
        let hook_name = name.clone();
        self.emitter
            .on(
                event_type,
                hook.priority,
                Arc::new(move |event: Event| {
                    let manager = manager.clone();
                    let hook_name = hook_name.clone();
                    Box::pin(async move {
                        manager.fire(&hook_name, event).await;
                    })
                }),
            )
            .await;

        info!(hook = %name, event = event_type.as_str(), "registered hook");
    }

    async fn fire(&self, hook_name: &str, event: Event) {
        let hook = {
            let inner = self.inner.read().await;
            match inner.hooks.get(hook_name) {
                Some(hook) if hook.enabled => hook.clone(),
                _ => return,
            }
        };
        let result = self.execute(&hook, &event).await;

        let mut inner = self.inner.write().await;
        inner.results.push(result.clone());
        if inner.results.len() > RESULTS_LIMIT {
            inner.results.remove(0);
        }
        if result.success {
            info!(hook = %hook.name, duration_ms = result.duration_ms, "hook completed");
        } else {
            warn!(hook = %hook.name, error = ?result.error, "hook failed");
        }
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.inner.write().await.hooks.remove(name).is_some()
    }

    pub async fn enable(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(hook) = inner.hooks.get_mut(name) else {
            return false;
        };
        hook.enabled = true;
        true
    }

    pub async fn disable(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(hook) = inner.hooks.get_mut(name) else {
            return false;
        };
        hook.enabled = false;
        true
    }

    pub async fn results(&self) -> Vec<HookResult> {
        self.inner.read().await.results.clone()
    }

    async fn execute(&self, hook: &Hook, event: &Event) -> HookResult {
        let start = Instant::now();
        let timestamp = Utc::now().naive_utc();

        let env = build_env(hook, event);
        let command = substitute_vars(&hook.command, &env);
        let cwd = hook
            .working_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.hooks_dir.clone());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&cwd).envs(&env).kill_on_drop(true);

        let mut result = match tokio::time::timeout(
            std::time::Duration::from_secs(hook.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if output.status.success() {
                    HookResult {
                        hook_name: hook.name.clone(),
                        success: true,
                        output: stdout,
                        error: None,
                        duration_ms: 0,
                        timestamp,
                    }
                } else {
                    HookResult {
                        hook_name: hook.name.clone(),
                        success: false,
                        output: stdout,
                        error: Some(format!("exit code {:?}: {stderr}", output.status.code())),
                        duration_ms: 0,
                        timestamp,
                    }
                }
            }
            Ok(Err(e)) => HookResult {
                hook_name: hook.name.clone(),
                success: false,
                output: String::new(),
                error: Some(e.to_string()),
                duration_ms: 0,
                timestamp,
            },
            Err(_) => HookResult {
                hook_name: hook.name.clone(),
                success: false,
                output: String::new(),
                error: Some(format!("timeout after {}s", hook.timeout_secs)),
                duration_ms: 0,
                timestamp,
            },
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Loads `hooks.yaml` from the configured directory, returning the
    /// number of hooks loaded. Entries naming an unrecognized event are
    /// logged and skipped rather than failing the whole load.
    pub async fn load_from_file(&self, path: Option<PathBuf>) -> usize {
        let path = path.unwrap_or_else(|| self.hooks_dir.join("hooks.yaml"));
        let file: HooksFile = match load_yaml(&path) {
            Ok(file) => file,
            Err(e) => {
                error!(error = %e, "failed to load hooks config");
                return 0;
            }
        };
        let mut count = 0;
        for config in file.hooks {
            match hook_from_config(config) {
                Some(hook) => {
                    self.register(hook).await;
                    count += 1;
                }
                None => warn!("skipping hook with unrecognized event"),
            }
        }
        info!(count, path = %path.display(), "loaded hooks");
        count
    }
}

fn hook_from_config(config: HookConfig) -> Option<Hook> {
    let event = parse_event(&config.event)?;
    let command = config.command?;
    Some(Hook {
        name: config.name,
        event,
        command,
        timeout_secs: config.timeout_secs,
        working_dir: config.working_dir,
        enabled: config.enabled,
        priority: config.priority,
        description: config.description,
    })
}

/// Builds the `CLARA_*` environment for a shell hook invocation, including
/// one `CLARA_{KEY}` scalar per event-data field.
fn build_env(hook: &Hook, event: &Event) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("CLARA_EVENT_TYPE".to_string(), event.event_type.as_str().to_string());
    env.insert("CLARA_TIMESTAMP".to_string(), event.timestamp.to_string());
    if let Some(node_id) = &event.node_id {
        env.insert("CLARA_NODE_ID".to_string(), node_id.clone());
    }
    if let Some(platform) = &event.platform {
        env.insert("CLARA_PLATFORM".to_string(), platform.clone());
    }
    if let Some(user_id) = &event.user_id {
        env.insert("CLARA_USER_ID".to_string(), user_id.clone());
    }
    if let Some(channel_id) = &event.channel_id {
        env.insert("CLARA_CHANNEL_ID".to_string(), channel_id.clone());
    }
    if let Some(request_id) = &event.request_id {
        env.insert("CLARA_REQUEST_ID".to_string(), request_id.clone());
    }
    env.insert("CLARA_EVENT_DATA".to_string(), event.data.to_string());
    if let Some(map) = event.data.as_object() {
        for (key, value) in map {
            let scalar = match value {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            if let Some(scalar) = scalar {
                env.insert(format!("CLARA_{}", key.to_uppercase()), scalar);
            }
        }
    }
    env.insert("HOOK_NAME".to_string(), hook.name.clone());
    env
}

/// Substitutes `${VAR}` occurrences in `command` from `env`, leaving
/// unrecognized variables untouched. Distinct from
/// `clara_supervisor::process::expand_env_placeholders`'s lookup against
/// the process environment: hooks substitute against the constructed event
/// env map instead.
fn substitute_vars(command: &str, env: &HashMap<String, String>) -> String {
    use std::sync::OnceLock;

    use regex::Regex;

    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    let mut out = String::with_capacity(command.len());
    let mut last = 0;
    for capture in pattern.captures_iter(command) {
        let whole = capture.get(0).unwrap();
        out.push_str(&command[last..whole.start()]);
        let var_name = &capture[1];
        match env.get(var_name) {
            Some(value) => out.push_str(value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&command[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(name: &str, event: EventType, command: &str) -> Hook {
        Hook {
            name: name.to_string(),
            event,
            command: command.to_string(),
            timeout_secs: 5,
            working_dir: None,
            enabled: true,
            priority: 0,
            description: None,
        }
    }

    #[tokio::test]
    async fn registered_hook_runs_when_its_event_fires() {
        let emitter = EventEmitter::new();
        let manager = HookManager::new(emitter.clone(), ".");
        manager
            .register(hook("echo-on-message", EventType::MessageReceived, "echo hi"))
            .await;

        emitter.emit(Event::new(EventType::MessageReceived)).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let results = manager.results().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].output.trim(), "hi");
    }

    #[tokio::test]
    async fn disabled_hook_does_not_run() {
        let emitter = EventEmitter::new();
        let manager = HookManager::new(emitter.clone(), ".");
        manager
            .register(hook("quiet", EventType::ToolExecuted, "echo should-not-run"))
            .await;
        manager.disable("quiet").await;

        emitter.emit(Event::new(EventType::ToolExecuted)).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(manager.results().await.is_empty());
    }

    #[test]
    fn substitute_vars_replaces_known_and_preserves_unknown() {
        let mut env = HashMap::new();
        env.insert("CLARA_USER_ID".to_string(), "discord-42".to_string());
        let out = substitute_vars("notify ${CLARA_USER_ID} via ${UNKNOWN_VAR}", &env);
        assert_eq!(out, "notify discord-42 via ${UNKNOWN_VAR}");
    }

    #[test]
    fn parse_event_rejects_unknown_names() {
        assert!(parse_event("not_a_real_event").is_none());
        assert!(parse_event("tool_executed").is_some());
    }
}
