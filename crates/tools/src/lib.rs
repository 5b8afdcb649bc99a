//! Tool Executor: a uniform call interface over heterogeneous tool
//! implementations, with a small set of built-in demonstration tools.
//!
//! A name-keyed `ToolRegistry` backs the gateway-wide
//! `clara_service_traits::ToolExecutor` the orchestrator drives.

mod builtin;
mod executor;
mod registry;

pub use builtin::register_builtins;
pub use executor::ToolExecutorImpl;
pub use registry::{Tool, ToolRegistry};
