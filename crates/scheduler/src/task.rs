use chrono::{Local, NaiveDateTime};
use clara_config::{TaskConfig, TaskKind};

use crate::cron;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    OneShot,
    Interval,
    Cron,
}

impl From<TaskKind> for TaskType {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::OneShot => TaskType::OneShot,
            TaskKind::Interval => TaskType::Interval,
            TaskKind::Cron => TaskType::Cron,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_name: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: NaiveDateTime,
}

/// A scheduled task and its runtime bookkeeping.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub task_type: TaskType,
    pub command: Option<String>,
    pub timeout_secs: u64,
    pub working_dir: Option<String>,

    pub interval_secs: Option<u64>,
    pub cron: Option<String>,
    pub delay_secs: Option<u64>,

    pub enabled: bool,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub run_count: u32,

    pub description: String,
}

impl ScheduledTask {
    pub fn from_config(config: TaskConfig) -> Self {
        let mut task = Self {
            name: config.name,
            task_type: config.kind.into(),
            command: config.command,
            timeout_secs: config.timeout_secs,
            working_dir: config.working_dir,
            interval_secs: config.interval_secs,
            cron: config.cron,
            delay_secs: config.delay_secs,
            enabled: config.enabled,
            last_run: None,
            next_run: None,
            run_count: 0,
            description: config.description.unwrap_or_default(),
        };
        task.next_run = task.calculate_next_run();
        task
    }

    /// Recompute `next_run` per the task's type, mirroring
    /// `Scheduler._calculate_next_run`.
    pub fn calculate_next_run(&self) -> Option<NaiveDateTime> {
        if !self.enabled {
            return None;
        }
        let now = Local::now().naive_local();

        match self.task_type {
            TaskType::OneShot => {
                if self.run_count > 0 {
                    return None;
                }
                match self.delay_secs {
                    Some(delay) if delay > 0 => Some(now + chrono::Duration::seconds(delay as i64)),
                    _ => Some(now),
                }
            }
            TaskType::Interval => {
                let interval = self.interval_secs?;
                if let Some(last) = self.last_run {
                    Some(last + chrono::Duration::seconds(interval as i64))
                } else {
                    match self.delay_secs {
                        Some(delay) if delay > 0 => Some(now + chrono::Duration::seconds(delay as i64)),
                        _ => Some(now),
                    }
                }
            }
            TaskType::Cron => {
                let expr = self.cron.as_ref()?;
                match cron::next_run(expr, now) {
                    Ok(next) => Some(next),
                    Err(e) => {
                        tracing::error!(task = %self.name, error = %e, "invalid cron expression");
                        None
                    }
                }
            }
        }
    }
}
