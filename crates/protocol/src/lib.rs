//! Wire protocol shared between the gateway and adapter subprocesses.
//!
//! Every frame is a JSON object discriminated by its `type` field. Unknown
//! types are ignored by readers rather than rejected, so adapters and the
//! gateway can evolve independently.

use serde::{Deserialize, Serialize};

/// Default dedup window, in milliseconds (30 s).
pub const DEDUPE_WINDOW_MS: u64 = 30_000;
/// Hard cap on dedup cache entries before a bulk eviction sweep.
pub const DEDUPE_MAX_ENTRIES: usize = 1_000;
/// Default debounce window, in milliseconds (2 s).
pub const DEBOUNCE_MS: u64 = 2_000;
/// Default bound on LLM tool-calling iterations per request.
pub const MAX_TOOL_ITERATIONS: usize = 75;
/// Default bound on characters kept from a single tool result.
pub const MAX_TOOL_RESULT_CHARS: usize = 50_000;
/// Default cap on consecutive auto-continue turns.
pub const AUTO_CONTINUE_MAX: u32 = 3;
/// Adapter application-level heartbeat interval.
pub const PING_INTERVAL_MS: u64 = 25_000;

/// Coded, machine-readable error identifiers carried by [`ErrorShape`].
pub mod error_codes {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const NOT_REGISTERED: &str = "not_registered";
    pub const NO_PROCESSOR: &str = "no_processor";
    pub const DUPLICATE: &str = "duplicate";
    pub const NOT_FOUND: &str = "not_found";
    pub const PROCESSING_ERROR: &str = "processing_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Body of an `ERROR` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub recoverable: bool,
}

impl ErrorShape {
    pub fn new(code: &str, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            recoverable,
        }
    }
}

/// Channel kind, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dm,
    Server,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A provider-neutral multimodal content part. Provider-specific JSON
/// shapes (Anthropic `image` blocks, OpenAI `image_url` parts, ...) are
/// derived from this at the LLM client boundary, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageBase64 { media_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
}

/// Capabilities an adapter may declare on registration.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "streaming",
    "attachments",
    "reactions",
    "embeds",
    "threads",
    "editing",
    "buttons",
    "cards",
];

/// The tagged-union wire message. `id` is per-message; `request_id`
/// correlates streamed frames back to the logical request that produced
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    Register {
        id: String,
        node_id: String,
        platform: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior_session_id: Option<String>,
    },
    Registered {
        id: String,
        session_id: String,
        is_reconnection: bool,
    },
    Unregister {
        id: String,
    },
    Ping {
        id: String,
    },
    Pong {
        id: String,
    },
    Message {
        id: String,
        user: UserInfo,
        channel: ChannelInfo,
        content: String,
        #[serde(default)]
        attachments: Vec<AttachmentInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier_override: Option<String>,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        is_mention: bool,
    },
    ResponseStart {
        id: String,
        request_id: String,
    },
    ResponseChunk {
        id: String,
        request_id: String,
        chunk: String,
        accumulated: String,
    },
    ResponseEnd {
        id: String,
        request_id: String,
        full_text: String,
        tool_count: u32,
        #[serde(default)]
        files: Vec<String>,
    },
    ToolStart {
        id: String,
        request_id: String,
        tool_name: String,
        step: u32,
        arguments: serde_json::Value,
    },
    ToolResult {
        id: String,
        request_id: String,
        tool_name: String,
        success: bool,
        output_preview: String,
    },
    Cancel {
        id: String,
        request_id: String,
    },
    Cancelled {
        id: String,
        request_id: String,
    },
    Error {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(flatten)]
        error: ErrorShape,
    },
    Status {
        id: String,
        active_count: usize,
        queue_length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uptime_secs: Option<u64>,
    },
    ProactiveMessage {
        id: String,
        user_id: String,
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        purpose: Option<String>,
    },
}

impl GatewayFrame {
    /// The `type` tag this frame serializes under, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            GatewayFrame::Register { .. } => "register",
            GatewayFrame::Registered { .. } => "registered",
            GatewayFrame::Unregister { .. } => "unregister",
            GatewayFrame::Ping { .. } => "ping",
            GatewayFrame::Pong { .. } => "pong",
            GatewayFrame::Message { .. } => "message",
            GatewayFrame::ResponseStart { .. } => "response_start",
            GatewayFrame::ResponseChunk { .. } => "response_chunk",
            GatewayFrame::ResponseEnd { .. } => "response_end",
            GatewayFrame::ToolStart { .. } => "tool_start",
            GatewayFrame::ToolResult { .. } => "tool_result",
            GatewayFrame::Cancel { .. } => "cancel",
            GatewayFrame::Cancelled { .. } => "cancelled",
            GatewayFrame::Error { .. } => "error",
            GatewayFrame::Status { .. } => "status",
            GatewayFrame::ProactiveMessage { .. } => "proactive_message",
        }
    }

    pub fn error(id: impl Into<String>, request_id: Option<String>, error: ErrorShape) -> Self {
        GatewayFrame::Error {
            id: id.into(),
            request_id,
            error,
        }
    }
}

/// Parse a raw text frame. Malformed JSON or a JSON value that doesn't
/// match any known variant's shape is an error the caller should translate
/// into `ERROR{code=invalid_json|invalid_message}`; an unrecognized `type`
/// tag on an otherwise-valid object is reported separately so callers can
/// log-and-ignore it per the wire contract instead of closing the socket.
pub fn parse_frame(raw: &str) -> Result<GatewayFrame, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    if value.get("type").is_none() {
        return Err(ParseError::InvalidMessage("missing `type` field".into()));
    }
    match serde_json::from_value::<GatewayFrame>(value.clone()) {
        Ok(frame) => Ok(frame),
        Err(_) => {
            let tag = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            Err(ParseError::UnknownType(tag))
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

impl ParseError {
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::InvalidJson(_) => error_codes::INVALID_JSON,
            ParseError::InvalidMessage(_) | ParseError::UnknownType(_) => {
                error_codes::INVALID_MESSAGE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips() {
        let frame = GatewayFrame::Register {
            id: "m1".into(),
            node_id: "cli-1".into(),
            platform: "cli".into(),
            capabilities: vec!["streaming".into()],
            prior_session_id: None,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        let parsed = parse_frame(&json).expect("parse");
        assert_eq!(parsed.type_name(), "register");
    }

    #[test]
    fn unknown_type_is_reported_not_fatal() {
        let err = parse_frame(r#"{"type":"mcp_list","id":"1"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownType(t) if t == "mcp_list"));
    }

    #[test]
    fn missing_type_is_invalid_message() {
        let err = parse_frame(r#"{"id":"1"}"#).unwrap_err();
        assert_eq!(err.code(), error_codes::INVALID_MESSAGE);
    }

    #[test]
    fn garbage_is_invalid_json() {
        let err = parse_frame("not json").unwrap_err();
        assert_eq!(err.code(), error_codes::INVALID_JSON);
    }
}
