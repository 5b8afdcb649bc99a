use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use clara_config::{AdapterConfig, RestartPolicy};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pidfile;
use crate::process;
use crate::state::AdapterState;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),
    #[error("failed to spawn adapter {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AdapterStatus {
    pub name: String,
    pub state: AdapterState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub total_starts: u32,
    pub total_failures: u32,
    pub last_error_category: Option<String>,
    pub cumulative_uptime: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterMetrics {
    pub total_restarts: u32,
    pub total_starts: u32,
    pub total_failures: u32,
    pub currently_running: u32,
    pub failed: u32,
}

struct Entry {
    config: AdapterConfig,
    state: Mutex<AdapterState>,
    pid: AtomicU32,
    restart_count: AtomicU32,
    first_restart_at: Mutex<Option<Instant>>,
    manual_stop: Arc<AtomicBool>,
    generation: AtomicU32,
    start_count: AtomicU32,
    failure_count: AtomicU32,
    last_exit_code: Mutex<Option<i32>>,
    last_error_category: Mutex<Option<String>>,
    started_at: Mutex<Option<Instant>>,
    cumulative_uptime: Mutex<Duration>,
}

impl Entry {
    fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

/// Categorizes a finished child process's exit for `last_error_category`.
/// `None` means the exit was clean (status 0).
fn classify_exit(status: &std::io::Result<std::process::ExitStatus>) -> Option<String> {
    match status {
        Err(e) => Some(format!("wait_error: {e}")),
        Ok(status) if status.success() => None,
        Ok(status) => match status.code() {
            Some(code) => Some(format!("nonzero_exit: {code}")),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    match status.signal() {
                        Some(signal) => Some(format!("signal: {signal}")),
                        None => Some("unknown_exit".to_string()),
                    }
                }
                #[cfg(not(unix))]
                {
                    Some("unknown_exit".to_string())
                }
            }
        },
    }
}

/// Spawns and restarts configured adapter subprocesses per each adapter's
/// restart policy.
#[derive(Clone)]
pub struct AdapterSupervisor {
    entries: Arc<HashMap<String, Arc<Entry>>>,
    reset_window_override: Option<Duration>,
}

impl AdapterSupervisor {
    pub fn new(adapters: HashMap<String, AdapterConfig>) -> Self {
        let entries = adapters
            .into_iter()
            .map(|(name, config)| {
                let initial = if config.enabled {
                    AdapterState::Stopped
                } else {
                    AdapterState::Disabled
                };
                (
                    name,
                    Arc::new(Entry {
                        config,
                        state: Mutex::new(initial),
                        pid: AtomicU32::new(0),
                        restart_count: AtomicU32::new(0),
                        first_restart_at: Mutex::new(None),
                        manual_stop: Arc::new(AtomicBool::new(false)),
                        generation: AtomicU32::new(0),
                        start_count: AtomicU32::new(0),
                        failure_count: AtomicU32::new(0),
                        last_exit_code: Mutex::new(None),
                        last_error_category: Mutex::new(None),
                        started_at: Mutex::new(None),
                        cumulative_uptime: Mutex::new(Duration::ZERO),
                    }),
                )
            })
            .collect();
        Self {
            entries: Arc::new(entries),
            reset_window_override: None,
        }
    }

    /// Start every enabled adapter, or only `names` if given.
    pub async fn start(&self, names: Option<&[String]>) -> Result<(), SupervisorError> {
        let targets: Vec<&String> = match names {
            Some(names) => names.iter().collect(),
            None => self.entries.keys().collect(),
        };
        for name in targets {
            let entry = self
                .entries
                .get(name)
                .ok_or_else(|| SupervisorError::UnknownAdapter(name.clone()))?
                .clone();
            if !entry.config.enabled {
                continue;
            }
            self.launch(name.clone(), entry).await?;
        }
        Ok(())
    }

    async fn launch(&self, name: String, entry: Arc<Entry>) -> Result<(), SupervisorError> {
        {
            let mut state = entry.state.lock().await;
            if matches!(*state, AdapterState::Running | AdapterState::Starting) {
                return Ok(());
            }
            *state = AdapterState::Starting;
        }
        entry.manual_stop.store(false, Ordering::SeqCst);
        let generation = entry.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut child = process::spawn(&name, &entry.config, None).map_err(|source| SupervisorError::Spawn {
            name: name.clone(),
            source,
        })?;
        if let Some(pid) = child.id() {
            entry.pid.store(pid, Ordering::SeqCst);
            let _ = pidfile::write(&name, pid);
        }
        entry.start_count.fetch_add(1, Ordering::SeqCst);
        *entry.started_at.lock().await = Some(Instant::now());
        *entry.state.lock().await = AdapterState::Running;
        info!(adapter = %name, "adapter started");
        record_fleet_gauges(self).await;

        let supervisor = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            if entry.generation.load(Ordering::SeqCst) != generation {
                // Superseded by a restart/stop that already relaunched this slot.
                return;
            }
            entry.pid.store(0, Ordering::SeqCst);
            pidfile::remove(&name);

            if let Some(started_at) = entry.started_at.lock().await.take() {
                *entry.cumulative_uptime.lock().await += started_at.elapsed();
            }
            *entry.last_exit_code.lock().await = status.as_ref().ok().and_then(|s| s.code());
            if let Some(category) = classify_exit(&status) {
                entry.failure_count.fetch_add(1, Ordering::SeqCst);
                *entry.last_error_category.lock().await = Some(category);
            }

            let manual_stop = entry.manual_stop.swap(false, Ordering::SeqCst);
            if manual_stop {
                *entry.state.lock().await = AdapterState::Stopped;
                record_fleet_gauges(&supervisor).await;
                return;
            }

            let exit_ok = status.map(|s| s.success()).unwrap_or(false);
            match entry.config.restart_policy {
                RestartPolicy::Never => {
                    *entry.state.lock().await = AdapterState::Stopped;
                    record_fleet_gauges(&supervisor).await;
                    return;
                }
                RestartPolicy::OnFailure if exit_ok => {
                    *entry.state.lock().await = AdapterState::Stopped;
                    record_fleet_gauges(&supervisor).await;
                    return;
                }
                _ => {}
            }

            if supervisor.record_restart_and_check_limit(&entry).await {
                *entry.state.lock().await = AdapterState::Failed;
                warn!(adapter = %name, "adapter exceeded max_restarts, marking failed");
                record_fleet_gauges(&supervisor).await;
                return;
            }

            tokio::time::sleep(Duration::from_secs(entry.config.restart_delay_secs)).await;
            if entry.manual_stop.load(Ordering::SeqCst) {
                *entry.state.lock().await = AdapterState::Stopped;
                record_fleet_gauges(&supervisor).await;
                return;
            }
            record_restart();
            if let Err(e) = supervisor.launch(name.clone(), entry.clone()).await {
                warn!(adapter = %name, error = %e, "adapter restart failed to spawn");
                *entry.state.lock().await = AdapterState::Failed;
                record_fleet_gauges(&supervisor).await;
            }
        });

        Ok(())
    }

    /// Returns `true` if the restart budget (`max_restarts` within
    /// `reset_window_secs`) has been exceeded.
    async fn record_restart_and_check_limit(&self, entry: &Entry) -> bool {
        let window = self
            .reset_window_override
            .unwrap_or_else(|| Duration::from_secs(entry.config.reset_window_secs));
        let now = Instant::now();
        let mut first_restart_at = entry.first_restart_at.lock().await;
        match *first_restart_at {
            Some(start) if now.duration_since(start) <= window => {
                let count = entry.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
                count > entry.config.max_restarts
            }
            _ => {
                *first_restart_at = Some(now);
                entry.restart_count.store(1, Ordering::SeqCst);
                1 > entry.config.max_restarts
            }
        }
    }

    /// Send a terminate signal; after `timeout`, nothing further is done
    /// here since `kill_on_drop` and the owning task's `child.wait()` bring
    /// the process down regardless, but the state is forced to `Stopped`
    /// so a stuck process doesn't wedge `get_status()`.
    pub async fn stop_adapter(&self, name: &str, timeout: Duration) -> Result<(), SupervisorError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownAdapter(name.to_string()))?
            .clone();

        entry.manual_stop.store(true, Ordering::SeqCst);
        *entry.state.lock().await = AdapterState::Stopping;
        let Some(pid) = entry.pid() else {
            *entry.state.lock().await = AdapterState::Stopped;
            return Ok(());
        };
        process::send_terminate(pid);

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if matches!(*entry.state.lock().await, AdapterState::Stopped) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        warn!(adapter = %name, "adapter did not stop within timeout, process will be force-killed on drop");
        pidfile::remove(name);
        Ok(())
    }

    pub async fn restart_adapter(&self, name: &str, timeout: Duration) -> Result<(), SupervisorError> {
        self.stop_adapter(name, timeout).await?;
        self.start(Some(std::slice::from_ref(&name.to_string()))).await
    }

    pub async fn get_status(&self) -> Vec<AdapterStatus> {
        let mut statuses = Vec::with_capacity(self.entries.len());
        for (name, entry) in self.entries.iter() {
            let mut cumulative_uptime = *entry.cumulative_uptime.lock().await;
            if let Some(started_at) = *entry.started_at.lock().await {
                cumulative_uptime += started_at.elapsed();
            }
            statuses.push(AdapterStatus {
                name: name.clone(),
                state: *entry.state.lock().await,
                pid: entry.pid(),
                restart_count: entry.restart_count.load(Ordering::SeqCst),
                last_exit_code: *entry.last_exit_code.lock().await,
                total_starts: entry.start_count.load(Ordering::SeqCst),
                total_failures: entry.failure_count.load(Ordering::SeqCst),
                last_error_category: entry.last_error_category.lock().await.clone(),
                cumulative_uptime,
            });
        }
        statuses
    }

    pub async fn get_metrics(&self) -> AdapterMetrics {
        let statuses = self.get_status().await;
        AdapterMetrics {
            total_restarts: statuses.iter().map(|s| s.restart_count).sum(),
            total_starts: statuses.iter().map(|s| s.total_starts).sum(),
            total_failures: statuses.iter().map(|s| s.total_failures).sum(),
            currently_running: statuses
                .iter()
                .filter(|s| s.state == AdapterState::Running)
                .count() as u32,
            failed: statuses
                .iter()
                .filter(|s| s.state == AdapterState::Failed)
                .count() as u32,
        }
    }

    #[cfg(test)]
    pub fn with_reset_window_override(mut self, window: Duration) -> Self {
        self.reset_window_override = Some(window);
        self
    }
}

#[cfg(feature = "metrics")]
async fn record_fleet_gauges(supervisor: &AdapterSupervisor) {
    let metrics = supervisor.get_metrics().await;
    clara_metrics::gauge!(clara_metrics::supervisor::ADAPTERS_RUNNING).set(metrics.currently_running as f64);
    clara_metrics::gauge!(clara_metrics::supervisor::ADAPTERS_FAILED).set(metrics.failed as f64);
}
#[cfg(not(feature = "metrics"))]
async fn record_fleet_gauges(_supervisor: &AdapterSupervisor) {}

#[cfg(feature = "metrics")]
fn record_restart() {
    clara_metrics::counter!(clara_metrics::supervisor::RESTARTS_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_restart() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(module: Vec<&str>, policy: RestartPolicy) -> AdapterConfig {
        AdapterConfig {
            enabled: true,
            module: module.into_iter().map(String::from).collect(),
            env: HashMap::new(),
            restart_policy: policy,
            restart_delay_secs: 0,
            max_restarts: 2,
            reset_window_secs: 300,
        }
    }

    #[tokio::test]
    async fn disabled_adapter_is_not_started() {
        let mut adapters = HashMap::new();
        adapters.insert(
            "quiet".to_string(),
            AdapterConfig {
                enabled: false,
                ..config(vec!["true"], RestartPolicy::Never)
            },
        );
        let supervisor = AdapterSupervisor::new(adapters);
        supervisor.start(None).await.unwrap();
        let status = supervisor.get_status().await;
        assert_eq!(status[0].state, AdapterState::Disabled);
    }

    #[tokio::test]
    async fn unconfigured_adapter_name_is_an_error() {
        let supervisor = AdapterSupervisor::new(HashMap::new());
        let err = supervisor.start(Some(&["ghost".to_string()])).await;
        assert!(matches!(err, Err(SupervisorError::UnknownAdapter(_))));
    }

    #[tokio::test]
    async fn never_policy_does_not_restart_after_exit() {
        let mut adapters = HashMap::new();
        adapters.insert(
            "short".to_string(),
            config(vec!["sh", "-c", "exit 1"], RestartPolicy::Never),
        );
        let supervisor = AdapterSupervisor::new(adapters);
        supervisor.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = supervisor.get_status().await;
        assert_eq!(status[0].state, AdapterState::Stopped);
    }

    #[tokio::test]
    async fn always_policy_restarts_until_limit_then_fails() {
        let mut adapters = HashMap::new();
        adapters.insert(
            "flappy".to_string(),
            config(vec!["sh", "-c", "exit 1"], RestartPolicy::Always),
        );
        let supervisor = AdapterSupervisor::new(adapters)
            .with_reset_window_override(Duration::from_secs(300));
        supervisor.start(None).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = supervisor.get_status().await;
                if status[0].state == AdapterState::Failed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("adapter should eventually be marked failed");

        let status = supervisor.get_status().await;
        assert!(status[0].restart_count >= 2);
    }
}
