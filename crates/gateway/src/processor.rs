//! Message Processor: builds context for one activated request, drives the
//! LLM Orchestrator's tool-calling loop, and streams the resulting frames
//! back to the owning connection.
//!
//! Long-term memory recall/storage is out of scope, so
//! `MemoryStore::recall`/`remember` stand in for it behind the
//! `NoopMemoryStore` default; the gateway context block itself (platform,
//! channel kind, sender) is always built regardless.

use std::sync::Arc;

use chrono::Utc;
use clara_common::new_id;
use clara_orchestrator::{GenerateRequest, LlmOrchestrator, Message};
use clara_protocol::{ChannelKind, ErrorShape, GatewayFrame, error_codes};
use clara_routing::ActivatedRequest;
use clara_service_traits::MemoryStore;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::events::{Event, EventEmitter, EventType};

/// Drives one activated request end to end: builds context, runs the
/// orchestrator, and sends `RESPONSE_START`/`RESPONSE_CHUNK`/`RESPONSE_END`/
/// `TOOL_START`/`TOOL_RESULT` frames to `send`. Returns `false` if the
/// orchestrator reported a failure, so the caller can mark the request
/// `Failed` rather than `Completed`.
pub async fn process(
    request: ActivatedRequest,
    channel_kind: ChannelKind,
    channel_name: Option<String>,
    platform: String,
    display_name: Option<String>,
    orchestrator: Arc<LlmOrchestrator>,
    memory: Arc<dyn MemoryStore>,
    events: EventEmitter,
    send: impl Fn(&GatewayFrame),
) -> bool {
    let response_id = format!("resp-{}", &new_id()[..8]);
    let is_dm = channel_kind == ChannelKind::Dm;

    info!(
        request_id = %request.request_id,
        user_id = %request.user_id,
        "processing message"
    );

    send(&GatewayFrame::ResponseStart {
        id: response_id.clone(),
        request_id: request.request_id.clone(),
    });

    let recalled = memory
        .recall(&request.user_id, &request.content)
        .await
        .unwrap_or_default();

    let context_block = build_gateway_context(&platform, channel_kind, channel_name.as_deref(), display_name.as_deref(), is_dm);

    let mut gen_request = GenerateRequest::new(request.user_id.clone(), request.request_id.clone(), request.content.clone());
    gen_request.messages = vec![Message::System(context_block)];
    if !recalled.is_empty() {
        gen_request.messages.push(Message::System(format!("## Relevant memory\n{}", recalled.join("\n"))));
    }
    gen_request.messages.push(Message::user(request.content.clone()));

    let mut stream = orchestrator.generate_with_tools(gen_request);
    let mut full_text = String::new();
    let mut tool_count = 0u32;
    let mut files = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            clara_orchestrator::OrchestratorEvent::ToolStart { tool_name, step, arguments } => {
                send(&GatewayFrame::ToolStart {
                    id: response_id.clone(),
                    request_id: request.request_id.clone(),
                    tool_name,
                    step,
                    arguments,
                });
            }
            clara_orchestrator::OrchestratorEvent::ToolResult { tool_name, success, output_preview } => {
                if !success {
                    events
                        .emit(
                            Event::new(EventType::ToolFailed)
                                .with_user(request.user_id.clone(), request.channel_id.clone())
                                .with_request(request.request_id.clone()),
                        )
                        .await;
                }
                send(&GatewayFrame::ToolResult {
                    id: response_id.clone(),
                    request_id: request.request_id.clone(),
                    tool_name,
                    success,
                    output_preview,
                });
            }
            clara_orchestrator::OrchestratorEvent::Chunk(chunk) => {
                full_text.push_str(&chunk);
                send(&GatewayFrame::ResponseChunk {
                    id: response_id.clone(),
                    request_id: request.request_id.clone(),
                    chunk,
                    accumulated: full_text.clone(),
                });
            }
            clara_orchestrator::OrchestratorEvent::Complete { text, tool_count: count, files: result_files } => {
                full_text = text;
                tool_count = count;
                files = result_files;
            }
            clara_orchestrator::OrchestratorEvent::Error { message } => {
                warn!(request_id = %request.request_id, error = %message, "orchestrator reported a failure");
                send(&GatewayFrame::error(
                    response_id.clone(),
                    Some(request.request_id.clone()),
                    ErrorShape::new(error_codes::PROCESSING_ERROR, message, true),
                ));
                return false;
            }
        }
    }

    if !full_text.is_empty() {
        if let Err(e) = memory.remember(&request.user_id, &format!("{}\n{}", request.content, full_text)).await {
            warn!(error = %e, "failed to store exchange in memory");
        }
    }

    send(&GatewayFrame::ResponseEnd {
        id: response_id.clone(),
        request_id: request.request_id.clone(),
        full_text: full_text.clone(),
        tool_count,
        files,
    });

    events
        .emit(
            Event::new(EventType::MessageProcessed)
                .with_user(request.user_id.clone(), request.channel_id.clone())
                .with_request(request.request_id.clone()),
        )
        .await;

    info!(
        response_id = %response_id,
        chars = full_text.len(),
        tool_count,
        "completed response"
    );
    true
}

/// Builds the "Current Context" system message block: current time,
/// platform, channel kind, and display name.
fn build_gateway_context(
    platform: &str,
    channel_kind: ChannelKind,
    channel_name: Option<&str>,
    display_name: Option<&str>,
    is_dm: bool,
) -> String {
    let mut parts = vec![
        "## Current Context".to_string(),
        format!("- Current time: {}", Utc::now().format("%A, %B %d, %Y at %H:%M UTC")),
        format!("- Platform: {platform}"),
    ];
    if is_dm {
        parts.push("- Conversation: Private DM".to_string());
    } else {
        match channel_kind {
            ChannelKind::Group => parts.push("- Conversation: Group chat".to_string()),
            ChannelKind::Server => {
                if let Some(name) = channel_name {
                    parts.push(format!("- Channel: #{name}"));
                }
            }
            ChannelKind::Dm => unreachable!("is_dm already handled above"),
        }
    }
    if let Some(name) = display_name {
        parts.push(format!("- User: {name}"));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_context_names_private_conversation() {
        let block = build_gateway_context("discord", ChannelKind::Dm, None, Some("Alice"), true);
        assert!(block.contains("Private DM"));
        assert!(block.contains("Alice"));
    }

    #[test]
    fn server_channel_context_names_the_channel() {
        let block = build_gateway_context("discord", ChannelKind::Server, Some("general"), None, false);
        assert!(block.contains("#general"));
    }
}
