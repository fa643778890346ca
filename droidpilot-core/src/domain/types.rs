use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument map of a tool call, keyed by parameter name.
pub type JsonMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One message on the model wire. `images` carries base64-encoded PNG data
/// for providers that accept inline images alongside text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, base64: impl Into<String>) -> Self {
        self.images.push(base64.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Classification of a failed tool call. The verify step branches on this,
/// so it is data on the result rather than a thrown error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    Validation,
    DeviceUnavailable,
    InvalidState,
    Timeout,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::Validation => "validation",
            FailureKind::DeviceUnavailable => "device_unavailable",
            FailureKind::InvalidState => "invalid_state",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

/// Opaque tool output. Image payloads carry both the on-disk path and the
/// base64 data so the model client can attach them without touching disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Empty,
    Text {
        text: String,
    },
    Json {
        value: Value,
    },
    Image {
        path: String,
        media_type: String,
        base64: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within a turn; fresh ids are minted for retried calls.
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: JsonMap,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: JsonMap) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool: tool.into(),
            arguments,
        }
    }

    /// Clone for re-issue with a fresh call id, keeping ids unique across
    /// the append-only transcript.
    pub fn reissued(&self) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool: self.tool.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub status: ToolStatus,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, payload: Payload) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            status: ToolStatus::Ok,
            payload,
            error_detail: None,
            failure: None,
        }
    }

    pub fn error(call: &ToolCall, failure: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            status: ToolStatus::Error,
            payload: Payload::Empty,
            error_detail: Some(detail.into()),
            failure: Some(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}
