//! Adapter Supervisor: spawns configured adapters as child processes and
//! keeps them running according to a restart policy.
//!
//! Each adapter is an independently supervised subprocess: spawned,
//! monitored, its stdout/stderr re-emitted through `tracing` under a
//! per-adapter target, and restarted on exit per its own `RestartPolicy`
//! (never/on-failure/always) with backoff and a reset window.

mod pidfile;
mod process;
mod state;
mod supervisor;

pub use pidfile::pid_file_path;
pub use state::AdapterState;
pub use supervisor::{AdapterMetrics, AdapterStatus, AdapterSupervisor, SupervisorError};
