use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clara_service_traits::ToolSchema;
use serde_json::Value;

/// A single callable tool. Implementations that do blocking work should
/// offload it via `tokio::task::spawn_blocking` internally rather than
/// block the caller's task.
///
/// Unlike [`clara_service_traits::ToolExecutor`], a `Tool` does not see the
/// gateway-wide `files_buffer`/`user_id` plumbing directly — those are
/// threaded in by [`crate::ToolExecutorImpl`] so individual tools stay
/// simple to implement and test in isolation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Returning `Err` is for genuine tool failures; the
    /// executor wraps the message as `"Error: {msg}"` so the orchestrator
    /// can feed it back to the LLM without raising.
    async fn execute(
        &self,
        arguments: Value,
        user_id: &str,
        files_buffer: &mut Vec<String>,
    ) -> Result<String, String>;
}

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }
}
