use std::time::Instant;

use async_trait::async_trait;
use clara_service_traits::{ToolExecutor, ToolSchema};
use serde_json::Value;
use tracing::warn;

use crate::registry::ToolRegistry;

/// Wraps a [`ToolRegistry`] as the gateway-wide
/// [`clara_service_traits::ToolExecutor`] the orchestrator drives, behind a
/// uniform `execute(tool_name, arguments, user_id, files_buffer)` call.
pub struct ToolExecutorImpl {
    registry: ToolRegistry,
}

impl ToolExecutorImpl {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolExecutorImpl {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        user_id: &str,
        files_buffer: &mut Vec<String>,
    ) -> String {
        let Some(tool) = self.registry.get(tool_name) else {
            return format!("Error: unknown tool {tool_name}");
        };

        let started_at = Instant::now();
        let result = tool.execute(arguments, user_id, files_buffer).await;
        record_execution_duration(started_at.elapsed().as_secs_f64());

        match result {
            Ok(output) => output,
            Err(message) => {
                warn!(tool = tool_name, error = %message, "tool execution failed");
                record_execution_error();
                format!("Error: {message}")
            }
        }
    }

    fn get_all_tools(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }
}

#[cfg(feature = "metrics")]
fn record_execution_duration(seconds: f64) {
    clara_metrics::histogram!(clara_metrics::tools::EXECUTION_DURATION_SECONDS).record(seconds);
}
#[cfg(not(feature = "metrics"))]
fn record_execution_duration(_seconds: f64) {}

#[cfg(feature = "metrics")]
fn record_execution_error() {
    clara_metrics::counter!(clara_metrics::tools::EXECUTION_ERRORS_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_execution_error() {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builtin::register_builtins;

    #[tokio::test]
    async fn unknown_tool_returns_error_string_without_panicking() {
        let executor = ToolExecutorImpl::new(ToolRegistry::new());
        let mut files = Vec::new();
        let output = executor
            .execute("nonexistent", Value::Null, "u1", &mut files)
            .await;
        assert_eq!(output, "Error: unknown tool nonexistent");
    }

    #[tokio::test]
    async fn builtin_echo_round_trips_input() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        let executor = ToolExecutorImpl::new(registry);
        let mut files = Vec::new();
        let output = executor
            .execute("echo", serde_json::json!({"text": "hi there"}), "u1", &mut files)
            .await;
        assert_eq!(output, "hi there");
    }

    #[tokio::test]
    async fn schemas_are_exposed_for_binding() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        let executor = ToolExecutorImpl::new(registry);
        let schemas = executor.get_all_tools();
        assert!(schemas.iter().any(|s| s.name == "echo"));
        let _ = Arc::new(executor);
    }
}
