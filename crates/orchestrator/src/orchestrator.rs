use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use clara_protocol::{AttachmentInfo, ContentPart, MAX_TOOL_ITERATIONS, MAX_TOOL_RESULT_CHARS};
use clara_service_traits::{LlmProvider, ToolExecutor, ToolSchema};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

use crate::auto_continue::should_auto_continue;
use crate::events::OrchestratorEvent;
use crate::messages::{Message, attach_images, to_values};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("llm provider error: {0}")]
    Provider(#[from] clara_service_traits::ServiceError),
}

/// One turn submitted to [`LlmOrchestrator::generate_with_tools`].
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub user_id: String,
    pub request_id: String,
    pub images: Vec<AttachmentInfo>,
    pub auto_continue_enabled: bool,
    pub auto_continue_max: u32,
}

impl GenerateRequest {
    pub fn new(user_id: impl Into<String>, request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(content)],
            user_id: user_id.into(),
            request_id: request_id.into(),
            images: Vec::new(),
            auto_continue_enabled: true,
            auto_continue_max: clara_protocol::AUTO_CONTINUE_MAX,
        }
    }
}

const TOOL_INSTRUCTION: &str = "Be proactive with tools: if a tool is relevant to the \
    user's request, use it without asking for permission first. After a tool call \
    completes, incorporate its result into your final answer.";

/// Drives the multi-turn LLM + tool-calling loop: generate, run any
/// requested tools, feed their results back, and repeat until the model
/// stops asking for tools or the step budget runs out.
pub struct LlmOrchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolExecutor>,
}

impl LlmOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { provider, tools }
    }

    /// Run the tool-calling loop for one request, yielding
    /// [`OrchestratorEvent`]s as they become available. Each auto-continue
    /// round runs as another pass of the outer loop rather than a nested
    /// call, since `async_stream`'s `stream!` macro has no clean way to
    /// recurse into itself.
    pub fn generate_with_tools(
        self: Arc<Self>,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = OrchestratorEvent> + Send>> {
        Box::pin(stream! {
            let started_at = Instant::now();
            let tool_schemas = self.tools.get_all_tools();
            let mut working_messages = request.messages;

            if !request.images.is_empty() {
                let parts: Vec<ContentPart> = request
                    .images
                    .iter()
                    .filter(|a| a.kind == "image")
                    .filter_map(|a| {
                        Some(ContentPart::ImageBase64 {
                            media_type: a.media_type.clone().unwrap_or_else(|| "image/jpeg".into()),
                            data: a.base64_data.clone()?,
                        })
                    })
                    .collect();
                attach_images(&mut working_messages, parts);
            }
            working_messages.insert(0, Message::System(TOOL_INSTRUCTION.to_string()));

            let mut files_to_send: Vec<String> = Vec::new();
            let mut total_tool_calls: u32 = 0;
            let mut accumulated_text = String::new();
            let mut auto_continue_round: u32 = 0;

            'rounds: loop {
                let mut final_text: Option<String> = None;

                for iteration in 0..MAX_TOOL_ITERATIONS {
                    debug!(request_id = %request.request_id, iteration, "calling llm");
                    let response = match self
                        .provider
                        .complete(&to_values(&working_messages), &schema_values(&tool_schemas))
                        .await
                    {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(request_id = %request.request_id, error = %err, "llm call failed");
                            record_tool_calls(total_tool_calls);
                            yield OrchestratorEvent::Error {
                                message: err.to_string(),
                            };
                            return;
                        }
                    };

                    if response.tool_calls.is_empty() {
                        final_text = Some(response.text);
                        break;
                    }

                    working_messages.push(Message::Assistant {
                        content: if response.text.is_empty() {
                            None
                        } else {
                            Some(response.text.clone())
                        },
                        tool_calls: response.tool_calls.clone(),
                    });

                    for tool_call in &response.tool_calls {
                        total_tool_calls += 1;
                        yield OrchestratorEvent::ToolStart {
                            tool_name: tool_call.name.clone(),
                            step: total_tool_calls,
                            arguments: tool_call.arguments.clone(),
                        };

                        let mut output = self
                            .tools
                            .execute(
                                &tool_call.name,
                                tool_call.arguments.clone(),
                                &request.user_id,
                                &mut files_to_send,
                            )
                            .await;

                        if output.len() > MAX_TOOL_RESULT_CHARS {
                            output = truncate_output(&output);
                        }

                        let success = !output.starts_with("Error:");
                        let preview: String = output.chars().take(200).collect();
                        yield OrchestratorEvent::ToolResult {
                            tool_name: tool_call.name.clone(),
                            success,
                            output_preview: preview,
                        };

                        working_messages.push(Message::Tool {
                            tool_call_id: tool_call.id.clone(),
                            content: output,
                        });
                    }
                }

                let text = match final_text {
                    Some(text) => text,
                    None => {
                        warn!(request_id = %request.request_id, "max tool iterations reached");
                        working_messages.push(Message::user(
                            "You've reached the maximum number of tool calls. \
                             Please summarize what you've accomplished.",
                        ));
                        match self
                            .provider
                            .complete(&to_values(&working_messages), &[])
                            .await
                        {
                            Ok(response) => response.text,
                            Err(_) => String::new(),
                        }
                    }
                };

                for chunk in stream_chunks(&text) {
                    yield OrchestratorEvent::Chunk(chunk);
                }
                if !accumulated_text.is_empty() {
                    accumulated_text.push_str("\n\n");
                }
                accumulated_text.push_str(&text);

                let might_continue = request.auto_continue_enabled
                    && auto_continue_round < request.auto_continue_max
                    && should_auto_continue(&text);
                if !might_continue {
                    break 'rounds;
                }

                info!(
                    request_id = %request.request_id,
                    round = auto_continue_round + 1,
                    "auto-continue triggered"
                );
                auto_continue_round += 1;
                record_auto_continue();
                working_messages.push(Message::Assistant {
                    content: Some(text),
                    tool_calls: Vec::new(),
                });
                working_messages.push(Message::user("Yes, please proceed."));
            }

            record_generation(started_at.elapsed().as_secs_f64());
            record_tool_calls(total_tool_calls);
            yield OrchestratorEvent::Complete {
                text: accumulated_text,
                tool_count: total_tool_calls,
                files: files_to_send,
            };
        })
    }
}

#[cfg(feature = "metrics")]
fn record_generation(seconds: f64) {
    clara_metrics::histogram!(clara_metrics::orchestrator::GENERATION_DURATION_SECONDS).record(seconds);
}
#[cfg(not(feature = "metrics"))]
fn record_generation(_seconds: f64) {}

#[cfg(feature = "metrics")]
fn record_tool_calls(count: u32) {
    if count > 0 {
        clara_metrics::counter!(clara_metrics::orchestrator::TOOL_CALLS_TOTAL).increment(count as u64);
    }
}
#[cfg(not(feature = "metrics"))]
fn record_tool_calls(_count: u32) {}

#[cfg(feature = "metrics")]
fn record_auto_continue() {
    clara_metrics::counter!(clara_metrics::orchestrator::AUTO_CONTINUE_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_auto_continue() {}

fn schema_values(schemas: &[ToolSchema]) -> Vec<serde_json::Value> {
    schemas
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "description": s.description,
                "parameters": s.parameters,
            })
        })
        .collect()
}

fn truncate_output(output: &str) -> String {
    let truncated: String = output.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    format!(
        "{truncated}\n\n[TRUNCATED: result was {} chars, showing first {MAX_TOOL_RESULT_CHARS}. \
         Use pagination or a more specific filter to get a smaller result.]",
        output.chars().count()
    )
}

/// Splits text into ~50-char word-aligned chunks, mirroring `_stream_text`'s
/// simulated streaming for providers whose `complete` call isn't itself
/// incremental.
fn stream_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        current.push_str(word);
        current.push(' ');
        if current.len() >= 50 {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use clara_service_traits::{CompletionResponse, NoopToolExecutor, ServiceResult, TextChunk, ToolCall};
    use tokio_stream::StreamExt;

    use super::*;

    struct ScriptedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: &[serde_json::Value],
            _tool_schemas: &[serde_json::Value],
        ) -> ServiceResult<CompletionResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match call {
                0 => CompletionResponse {
                    text: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".into(),
                        name: "echo".into(),
                        arguments: serde_json::json!({"text": "hi"}),
                    }],
                },
                _ => CompletionResponse {
                    text: "All done!".into(),
                    tool_calls: vec![],
                },
            })
        }

        async fn stream(
            &self,
            _messages: &[serde_json::Value],
            _on_chunk: &mut (dyn FnMut(TextChunk) + Send),
        ) -> ServiceResult<String> {
            Ok(String::new())
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolExecutor for EchoTools {
        async fn execute(
            &self,
            tool_name: &str,
            arguments: serde_json::Value,
            _user_id: &str,
            _files_buffer: &mut Vec<String>,
        ) -> String {
            format!("ran {tool_name} with {arguments}")
        }

        fn get_all_tools(&self) -> Vec<ToolSchema> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn runs_a_tool_then_returns_final_text() {
        let orchestrator = Arc::new(LlmOrchestrator::new(
            Arc::new(ScriptedProvider {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(EchoTools),
        ));
        let request = GenerateRequest::new("u1", "r1", "do the thing");
        let mut events: Vec<OrchestratorEvent> =
            orchestrator.generate_with_tools(request).collect().await;

        let complete = events.pop().expect("at least one event");
        match complete {
            OrchestratorEvent::Complete { text, tool_count, .. } => {
                assert_eq!(text, "All done!");
                assert_eq!(tool_count, 1);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
        assert!(
            events
                .iter()
                .any(|e| matches!(e, OrchestratorEvent::ToolStart { tool_name, .. } if tool_name == "echo"))
        );
    }

    #[tokio::test]
    async fn no_tool_calls_streams_straight_to_complete() {
        let orchestrator = Arc::new(LlmOrchestrator::new(
            Arc::new(ScriptedProvider {
                calls: AtomicUsize::new(1),
            }),
            Arc::new(NoopToolExecutor),
        ));
        let request = GenerateRequest::new("u1", "r2", "hello");
        let events: Vec<OrchestratorEvent> =
            orchestrator.generate_with_tools(request).collect().await;
        assert!(matches!(events.last(), Some(OrchestratorEvent::Complete { .. })));
        assert!(!events.iter().any(|e| matches!(e, OrchestratorEvent::ToolStart { .. })));
    }
}
