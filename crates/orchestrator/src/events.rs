use serde_json::Value;

/// Events emitted while `LlmOrchestrator::generate_with_tools` runs, mapped
/// directly onto the gateway's `TOOL_START`/`TOOL_RESULT`/`RESPONSE_CHUNK`/
/// `RESPONSE_END` wire frames by the caller.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    ToolStart {
        tool_name: String,
        step: u32,
        arguments: Value,
    },
    ToolResult {
        tool_name: String,
        success: bool,
        output_preview: String,
    },
    Chunk(String),
    Complete {
        text: String,
        tool_count: u32,
        files: Vec<String>,
    },
    /// The LLM provider call failed; no further events follow for this
    /// request. The caller translates this into an `ERROR` wire frame
    /// rather than presenting it as a completed response.
    Error {
        message: String,
    },
}
