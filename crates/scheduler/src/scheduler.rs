use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use clara_config::{SchedulerFile, load_yaml};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::task::{ScheduledTask, TaskResult, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("task {0} has no command or is misconfigured")]
    NotRunnable(String),
}

/// Delivers a proactive message to a connected platform adapter.
///
/// The gateway implements this so the scheduler can deliver messages without
/// depending on the gateway crate directly.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Broadcasts `content` to `platform`, returning the number of adapters
    /// that received it.
    async fn broadcast_to_platform(&self, platform: &str, user_id: &str, channel_id: &str, content: &str) -> usize;
}

pub struct NoopMessageSink;

#[async_trait]
impl MessageSink for NoopMessageSink {
    async fn broadcast_to_platform(&self, _platform: &str, _user_id: &str, _channel_id: &str, _content: &str) -> usize {
        0
    }
}

const RESULTS_LIMIT: usize = 100;

struct Inner {
    tasks: HashMap<String, ScheduledTask>,
    results: Vec<TaskResult>,
}

/// Runs one-shot, interval, and cron tasks on a ~100ms poll loop.
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    config_dir: PathBuf,
    sink: Arc<dyn MessageSink>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl Scheduler {
    pub fn new(config_dir: impl Into<PathBuf>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tasks: HashMap::new(),
                results: Vec::new(),
            })),
            config_dir: config_dir.into(),
            sink,
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Sends a message to a user, deriving the platform from the
    /// `platform-id` prefix convention (e.g. `"discord-123"` -> `"discord"`).
    pub async fn send_message(&self, user_id: &str, channel_id: &str, message: &str, purpose: &str) -> bool {
        let platform = user_id.split('-').next().unwrap_or("unknown");
        let count = self.sink.broadcast_to_platform(platform, user_id, channel_id, message).await;
        if count > 0 {
            info!(platform, count, purpose, "scheduled message delivered");
            true
        } else {
            warn!(platform, "no connected adapters for message delivery");
            false
        }
    }

    pub async fn add_task(&self, task: ScheduledTask) {
        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(&task.name) {
            warn!(task = %task.name, "overwriting existing task");
        }
        info!(task = %task.name, next_run = ?task.next_run, "added task");
        inner.tasks.insert(task.name.clone(), task);
    }

    pub async fn remove_task(&self, name: &str) -> bool {
        self.inner.lock().await.tasks.remove(name).is_some()
    }

    pub async fn enable_task(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(name) else {
            return false;
        };
        task.enabled = true;
        task.next_run = task.calculate_next_run();
        true
    }

    pub async fn disable_task(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(name) else {
            return false;
        };
        task.enabled = false;
        task.next_run = None;
        true
    }

    pub async fn get_results(&self) -> Vec<TaskResult> {
        self.inner.lock().await.results.clone()
    }

    pub async fn get_stats(&self) -> HashMap<String, (u32, Option<chrono::NaiveDateTime>)> {
        self.inner
            .lock()
            .await
            .tasks
            .values()
            .map(|t| (t.name.clone(), (t.run_count, t.next_run)))
            .collect()
    }

    /// Loads `scheduler.yaml` from the configured directory, returning the
    /// number of tasks loaded.
    pub async fn load_from_file(&self, path: Option<PathBuf>) -> usize {
        let path = path.unwrap_or_else(|| self.config_dir.join("scheduler.yaml"));
        let file: SchedulerFile = match load_yaml(&path) {
            Ok(file) => file,
            Err(e) => {
                error!(error = %e, "failed to load scheduler config");
                return 0;
            }
        };
        let mut count = 0;
        for config in file.tasks {
            self.add_task(ScheduledTask::from_config(config)).await;
            count += 1;
        }
        info!(count, path = %path.display(), "loaded scheduled tasks");
        count
    }

    /// Runs the ~100ms poll loop until `running` is flipped off, spawning
    /// one background task per due scheduled task.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, std::sync::atomic::Ordering::SeqCst);
        while self.running.load(std::sync::atomic::Ordering::SeqCst) {
            let now = Local::now().naive_local();
            let due: Vec<String> = {
                let inner = self.inner.lock().await;
                inner
                    .tasks
                    .values()
                    .filter(|t| t.enabled && t.next_run.is_some_and(|next| now >= next))
                    .map(|t| t.name.clone())
                    .collect()
            };
            for name in due {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.run_task(&name).await;
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// Runs `name` immediately, outside the poll loop, returning its result.
    pub async fn run_task_now(&self, name: &str) -> Result<TaskResult, SchedulerError> {
        if !self.inner.lock().await.tasks.contains_key(name) {
            return Err(SchedulerError::UnknownTask(name.to_string()));
        }
        Ok(self.run_task(name).await)
    }

    async fn run_task(&self, name: &str) -> TaskResult {
        let start = Instant::now();
        let command = {
            let inner = self.inner.lock().await;
            inner.tasks.get(name).and_then(|t| t.command.clone())
        };

        let mut result = match command {
            Some(command) => self.run_shell_task(name, &command).await,
            None => TaskResult {
                task_name: name.to_string(),
                success: false,
                output: String::new(),
                error: Some("no command specified".to_string()),
                duration_ms: 0,
                timestamp: Local::now().naive_local(),
            },
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        record_task_duration(result.duration_ms as f64 / 1000.0);
        record_task_run();

        if result.success {
            info!(task = name, duration_ms = result.duration_ms, "task completed");
        } else {
            warn!(task = name, error = ?result.error, "task failed");
            record_task_failure();
        }

        let mut inner = self.inner.lock().await;
        inner.results.push(result.clone());
        if inner.results.len() > RESULTS_LIMIT {
            inner.results.remove(0);
        }
        if let Some(task) = inner.tasks.get_mut(name) {
            task.last_run = Some(result.timestamp);
            task.run_count += 1;
            task.next_run = task.calculate_next_run();
        }

        result
    }

    async fn run_shell_task(&self, name: &str, command: &str) -> TaskResult {
        let timestamp = Local::now().naive_local();
        let (timeout_secs, working_dir) = {
            let inner = self.inner.lock().await;
            match inner.tasks.get(name) {
                Some(task) => (task.timeout_secs, task.working_dir.clone()),
                None => (60, None),
            }
        };
        let cwd = working_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config_dir.clone());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&cwd).kill_on_drop(true);

        let spawn = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await;

        match spawn {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if output.status.success() {
                    TaskResult {
                        task_name: name.to_string(),
                        success: true,
                        output: stdout,
                        error: None,
                        duration_ms: 0,
                        timestamp,
                    }
                } else {
                    TaskResult {
                        task_name: name.to_string(),
                        success: false,
                        output: stdout,
                        error: Some(format!("exit code {:?}: {stderr}", output.status.code())),
                        duration_ms: 0,
                        timestamp,
                    }
                }
            }
            Ok(Err(e)) => {
                debug!(task = name, error = %e, "shell task failed to spawn");
                TaskResult {
                    task_name: name.to_string(),
                    success: false,
                    output: String::new(),
                    error: Some(e.to_string()),
                    duration_ms: 0,
                    timestamp,
                }
            }
            Err(_) => TaskResult {
                task_name: name.to_string(),
                success: false,
                output: String::new(),
                error: Some(format!("timeout after {timeout_secs}s")),
                duration_ms: 0,
                timestamp,
            },
        }
    }
}

#[cfg(feature = "metrics")]
fn record_task_run() {
    clara_metrics::counter!(clara_metrics::scheduler::TASK_RUNS_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_task_run() {}

#[cfg(feature = "metrics")]
fn record_task_failure() {
    clara_metrics::counter!(clara_metrics::scheduler::TASK_FAILURES_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_task_failure() {}

#[cfg(feature = "metrics")]
fn record_task_duration(seconds: f64) {
    clara_metrics::histogram!(clara_metrics::scheduler::TASK_DURATION_SECONDS).record(seconds);
}
#[cfg(not(feature = "metrics"))]
fn record_task_duration(_seconds: f64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use clara_config::{TaskConfig, TaskKind};

    fn one_shot(name: &str, command: &str) -> ScheduledTask {
        ScheduledTask::from_config(TaskConfig {
            name: name.to_string(),
            kind: TaskKind::OneShot,
            command: Some(command.to_string()),
            interval_secs: None,
            cron: None,
            delay_secs: None,
            timeout_secs: 5,
            working_dir: None,
            enabled: true,
            description: None,
        })
    }

    #[tokio::test]
    async fn run_task_now_executes_shell_command_successfully() {
        let scheduler = Scheduler::new(".", Arc::new(NoopMessageSink));
        scheduler.add_task(one_shot("echo-task", "echo hello")).await;
        let result = scheduler.run_task_now("echo-task").await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.trim(), "hello");
    }

    #[tokio::test]
    async fn run_task_now_reports_nonzero_exit() {
        let scheduler = Scheduler::new(".", Arc::new(NoopMessageSink));
        scheduler.add_task(one_shot("fail-task", "exit 3")).await;
        let result = scheduler.run_task_now("fail-task").await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("3"));
    }

    #[tokio::test]
    async fn unknown_task_run_now_is_an_error() {
        let scheduler = Scheduler::new(".", Arc::new(NoopMessageSink));
        assert!(matches!(
            scheduler.run_task_now("ghost").await,
            Err(SchedulerError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn send_message_with_noop_sink_reports_no_delivery() {
        let scheduler = Scheduler::new(".", Arc::new(NoopMessageSink));
        let delivered = scheduler.send_message("discord-123", "chan-1", "hi", "test").await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn disable_then_enable_task_recomputes_next_run() {
        let scheduler = Scheduler::new(".", Arc::new(NoopMessageSink));
        scheduler.add_task(one_shot("t1", "true")).await;
        assert!(scheduler.disable_task("t1").await);
        assert!(scheduler.enable_task("t1").await);
        let stats = scheduler.get_stats().await;
        assert!(stats["t1"].1.is_some());
    }
}
