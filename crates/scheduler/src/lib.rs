//! Scheduler: one-shot, interval, and cron task execution.
//!
//! The cron day-of-week field uses the conventional 0=Sunday numbering.
//! `cron::next_run` compares it via `chrono::Weekday::num_days_from_sunday()`,
//! which maps Sunday to 0 directly, so a Sunday-only cron entry (`0`) fires
//! on Sundays rather than silently never matching.

mod cron;
mod scheduler;
mod task;

pub use cron::{CronError, next_run};
pub use scheduler::{MessageSink, NoopMessageSink, Scheduler, SchedulerError};
pub use task::{ScheduledTask, TaskResult, TaskType};
