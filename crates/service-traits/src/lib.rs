//! Trait boundaries for this gateway's external collaborators: LLM provider
//! SDKs, tool implementations, and the memory store. Each trait ships a
//! `Noop*` implementation so the rest of the workspace compiles and is
//! testable without a real backend wired in.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("{0}")]
    Failed(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// One step of an LLM completion: either a tool call or a terminal text
/// answer, as a normalized model-agnostic shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// A single streamed text delta from a provider's streaming completion API.
pub type TextChunk = String;

/// The provider boundary the orchestrator drives. Concrete implementations
/// (OpenAI, Anthropic, a local model, ...) live outside this workspace;
/// this trait is the seam the spec asks the core to stop at.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streaming call with tools bound.
    async fn complete(
        &self,
        messages: &[Value],
        tool_schemas: &[Value],
    ) -> ServiceResult<CompletionResponse>;

    /// Streaming call with no tools bound; used for the final user-visible
    /// answer once the tool loop has settled.
    async fn stream(
        &self,
        messages: &[Value],
        on_chunk: &mut (dyn FnMut(TextChunk) + Send),
    ) -> ServiceResult<String>;
}

pub struct NoopLlmProvider;

#[async_trait]
impl LlmProvider for NoopLlmProvider {
    async fn complete(&self, _messages: &[Value], _tool_schemas: &[Value]) -> ServiceResult<CompletionResponse> {
        Err(ServiceError::NotConfigured("llm provider"))
    }

    async fn stream(
        &self,
        _messages: &[Value],
        _on_chunk: &mut (dyn FnMut(TextChunk) + Send),
    ) -> ServiceResult<String> {
        Err(ServiceError::NotConfigured("llm provider"))
    }
}

/// A single tool's JSON schema, as bound to the LLM.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Uniform call interface over heterogeneous tool implementations (§4.5).
/// `files_buffer` receives file identifiers a tool wants forwarded to the
/// adapter in `RESPONSE_END`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        user_id: &str,
        files_buffer: &mut Vec<String>,
    ) -> String;

    fn get_all_tools(&self) -> Vec<ToolSchema>;
}

pub struct NoopToolExecutor;

#[async_trait]
impl ToolExecutor for NoopToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        _arguments: Value,
        _user_id: &str,
        _files_buffer: &mut Vec<String>,
    ) -> String {
        format!("Error: unknown tool {tool_name}")
    }

    fn get_all_tools(&self) -> Vec<ToolSchema> {
        Vec::new()
    }
}

/// Fact/context retrieval the orchestrator may fold into a request's
/// system context. No concrete backend ships here; stubbed so the
/// context-assembly code path has somewhere real to call.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn recall(&self, user_id: &str, query: &str) -> ServiceResult<Vec<String>>;
    async fn remember(&self, user_id: &str, exchange: &str) -> ServiceResult<()>;
}

pub struct NoopMemoryStore;

#[async_trait]
impl MemoryStore for NoopMemoryStore {
    async fn recall(&self, _user_id: &str, _query: &str) -> ServiceResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn remember(&self, _user_id: &str, _exchange: &str) -> ServiceResult<()> {
        Ok(())
    }
}
