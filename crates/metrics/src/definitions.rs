//! Metric name definitions for the gateway's own components.
//!
//! Centralizing these names keeps the counters/gauges emitted across crates
//! consistent without requiring every call site to hand-build a string.

/// Message router metrics.
pub mod router {
    /// Number of requests currently in the active/in-flight state.
    pub const ACTIVE_REQUESTS: &str = "clara_router_active_requests";
    /// Total requests queued behind an in-flight request for the same channel.
    pub const QUEUED_TOTAL: &str = "clara_router_queued_total";
    /// Total requests rejected as duplicates by the dedupe cache.
    pub const DEDUPE_REJECTED_TOTAL: &str = "clara_router_dedupe_rejected_total";
    /// Total debounce batches flushed into a single activated request.
    pub const DEBOUNCE_FLUSHED_TOTAL: &str = "clara_router_debounce_flushed_total";
}

/// LLM orchestrator metrics.
pub mod orchestrator {
    /// Duration of one `generate_with_tools` call, start to `Complete`.
    pub const GENERATION_DURATION_SECONDS: &str = "clara_orchestrator_generation_duration_seconds";
    /// Total tool invocations issued by the orchestrator's tool-calling loop.
    pub const TOOL_CALLS_TOTAL: &str = "clara_orchestrator_tool_calls_total";
    /// Total auto-continue rounds triggered.
    pub const AUTO_CONTINUE_TOTAL: &str = "clara_orchestrator_auto_continue_total";
}

/// Tool executor metrics.
pub mod tools {
    /// Duration of a single tool execution.
    pub const EXECUTION_DURATION_SECONDS: &str = "clara_tools_execution_duration_seconds";
    /// Total tool executions that returned an error.
    pub const EXECUTION_ERRORS_TOTAL: &str = "clara_tools_execution_errors_total";
}

/// Adapter supervisor metrics.
pub mod supervisor {
    /// Number of adapters currently in the running state.
    pub const ADAPTERS_RUNNING: &str = "clara_supervisor_adapters_running";
    /// Total adapter restarts across all adapters.
    pub const RESTARTS_TOTAL: &str = "clara_supervisor_restarts_total";
    /// Number of adapters currently in the failed state.
    pub const ADAPTERS_FAILED: &str = "clara_supervisor_adapters_failed";
}

/// Scheduler metrics.
pub mod scheduler {
    /// Total scheduled task runs.
    pub const TASK_RUNS_TOTAL: &str = "clara_scheduler_task_runs_total";
    /// Total scheduled task runs that failed.
    pub const TASK_FAILURES_TOTAL: &str = "clara_scheduler_task_failures_total";
    /// Duration of a single task run.
    pub const TASK_DURATION_SECONDS: &str = "clara_scheduler_task_duration_seconds";
}

/// WebSocket gateway metrics.
pub mod gateway {
    /// Number of currently connected WebSocket nodes.
    pub const CONNECTIONS_ACTIVE: &str = "clara_gateway_connections_active";
    /// Total frames received across all connections.
    pub const FRAMES_RECEIVED_TOTAL: &str = "clara_gateway_frames_received_total";
    /// Total frames sent across all connections.
    pub const FRAMES_SENT_TOTAL: &str = "clara_gateway_frames_sent_total";
    /// Total connections rejected during the authentication handshake.
    pub const AUTH_REJECTED_TOTAL: &str = "clara_gateway_auth_rejected_total";
}
