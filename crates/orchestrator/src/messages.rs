use clara_protocol::ContentPart;
use clara_service_traits::ToolCall;
use serde_json::{Value, json};

/// A single turn in the conversation sent to an [`clara_service_traits::LlmProvider`].
///
/// This is the orchestrator's own typed representation; it is flattened to
/// the `Vec<Value>` wire shape `LlmProvider::complete` expects right before
/// the call, keeping the orchestrator decoupled from any one provider SDK's
/// message format.
#[derive(Debug, Clone)]
pub enum Message {
    System(String),
    User {
        content: String,
        parts: Option<Vec<ContentPart>>,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            parts: None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::System(content) => json!({"role": "system", "content": content}),
            Message::User { content, parts } => match parts {
                Some(parts) if !parts.is_empty() => json!({
                    "role": "user",
                    "content": parts,
                }),
                _ => json!({"role": "user", "content": content}),
            },
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut value = json!({ "role": "assistant" });
                if let Some(content) = content {
                    value["content"] = Value::String(content.clone());
                }
                if !tool_calls.is_empty() {
                    value["tool_calls"] = Value::Array(
                        tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string(),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                value
            }
            Message::Tool {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        }
    }
}

/// Attach image parts to the last [`Message::User`] turn, folding vision
/// attachments into the active conversation rather than starting a new one.
pub fn attach_images(messages: &mut [Message], images: Vec<ContentPart>) {
    if images.is_empty() {
        return;
    }
    for message in messages.iter_mut().rev() {
        if let Message::User { content, parts } = message {
            let mut all_parts = parts.clone().unwrap_or_else(|| {
                vec![ContentPart::Text {
                    text: content.clone(),
                }]
            });
            all_parts.extend(images);
            *parts = Some(all_parts);
            return;
        }
    }
}

pub fn to_values(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(Message::to_value).collect()
}
