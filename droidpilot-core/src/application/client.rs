//! Model client: turns the transcript and the tool catalog into a provider
//! request, and the provider's raw text back into a tagged
//! [`ModelOutput`]. All parsing fragility is isolated here; the loop only
//! ever sees the variant or a typed error.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::registry::ToolRegistry;
use crate::constants::TRANSCRIPT_WINDOW;
use crate::domain::{
    ChatMessage, JsonMap, MessageRole, Payload, ToolCall, Transcript, TranscriptEvent,
};
use crate::model::{ModelError, ModelProvider, ModelRequest};

/// What the model decided this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    FinalAnswer { text: String },
    ToolRequests { calls: Vec<ToolCall> },
}

#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error(transparent)]
    Provider(#[from] ModelError),
    #[error("malformed model response: {0}")]
    Malformed(String),
}

pub struct ModelClient<P: ModelProvider> {
    provider: P,
    model: String,
    request_timeout: Duration,
}

impl<P: ModelProvider> ModelClient<P> {
    pub fn new(provider: P, model: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            request_timeout,
        }
    }

    /// One planning turn. This is the only unbounded-blocking operation in
    /// the loop, bounded here by the configured request timeout.
    pub async fn plan(
        &self,
        transcript: &Transcript,
        registry: &ToolRegistry,
    ) -> Result<ModelOutput, ModelClientError> {
        let messages = build_messages(transcript, registry);
        debug!(
            messages = messages.len(),
            window = TRANSCRIPT_WINDOW,
            "Submitting planning turn to model provider"
        );
        let response = self
            .provider
            .chat(ModelRequest {
                model: self.model.clone(),
                messages,
                timeout: self.request_timeout,
            })
            .await?;
        parse_output(&response.message.content)
    }
}

/// System instructions: workflow discipline plus the JSON action protocol
/// and the tool catalog.
pub fn compose_system_instructions(registry: &ToolRegistry) -> String {
    let manifest = serde_json::to_string(&registry.schema_manifest()).unwrap_or_default();
    let lines = vec![
        "You are an autonomous agent operating a real Android device through a fixed set of tools."
            .to_string(),
        "Work in a cycle: analyse the request, act with tools, check each tool result, then report."
            .to_string(),
        "All responses must be a single JSON object without commentary or code fences.".to_string(),
        "To act, respond with: {\"action\":\"call_tools\",\"calls\":[{\"tool\":\"tool_name\",\"input\":{...}}]}. Calls run in the order given."
            .to_string(),
        "When the task is complete (or impossible), respond with: {\"action\":\"final\",\"response\":\"...\"}."
            .to_string(),
        "After a failed tool result, adjust the approach: try different coordinates, another tool, or take a screenshot to re-orient."
            .to_string(),
        format!("Tool catalog: {manifest}"),
    ];
    lines.join(" ")
}

fn build_messages(transcript: &Transcript, registry: &ToolRegistry) -> Vec<ChatMessage> {
    let window = transcript.tail(TRANSCRIPT_WINDOW);

    // Attach only the most recent screenshot; older frames rarely help and
    // bloat the request.
    let latest_image_seq = window
        .iter()
        .rev()
        .find_map(|entry| match &entry.event {
            TranscriptEvent::ToolResult(result) => match &result.payload {
                Payload::Image { .. } => Some(entry.seq),
                _ => None,
            },
            _ => None,
        });

    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(ChatMessage::new(
        MessageRole::System,
        compose_system_instructions(registry),
    ));

    for entry in window {
        let message = match &entry.event {
            TranscriptEvent::UserInstruction { text } => {
                ChatMessage::new(MessageRole::User, text.clone())
            }
            TranscriptEvent::ModelUtterance { text } => {
                ChatMessage::new(MessageRole::Assistant, text.clone())
            }
            TranscriptEvent::ToolCall(call) => ChatMessage::new(
                MessageRole::Assistant,
                json!({
                    "action": "call_tool",
                    "call_id": call.call_id,
                    "tool": call.tool,
                    "input": call.arguments,
                })
                .to_string(),
            ),
            TranscriptEvent::ToolResult(result) => {
                let mut message = ChatMessage::new(
                    MessageRole::User,
                    json!({
                        "tool_result": {
                            "call_id": result.call_id,
                            "tool": result.tool,
                            "status": result.status,
                            "payload": payload_value(&result.payload),
                            "error_detail": result.error_detail,
                        }
                    })
                    .to_string(),
                );
                if latest_image_seq == Some(entry.seq) {
                    if let Payload::Image { base64, .. } = &result.payload {
                        message = message.with_image(base64.clone());
                    }
                }
                message
            }
        };
        messages.push(message);
    }

    messages
}

/// Wire rendering of a payload. Image data goes out as a message
/// attachment, not inline JSON.
fn payload_value(payload: &Payload) -> Value {
    match payload {
        Payload::Empty => Value::Null,
        Payload::Text { text } => json!(text),
        Payload::Json { value } => value.clone(),
        Payload::Image {
            path, media_type, ..
        } => json!({ "kind": "image", "path": path, "media_type": media_type }),
    }
}

/// Parse the model's raw text. Policy: if any well-formed action object is
/// embedded, it wins over surrounding prose; a broken action object is a
/// `Malformed` error; plain text with no JSON is a final answer.
pub fn parse_output(content: &str) -> Result<ModelOutput, ModelClientError> {
    match extract_json(content) {
        Some(value) => parse_action_value(value),
        None => Ok(ModelOutput::FinalAnswer {
            text: content.trim().to_string(),
        }),
    }
}

fn parse_action_value(value: Value) -> Result<ModelOutput, ModelClientError> {
    match value {
        Value::Object(map) => {
            if let Some(action) = map.get("action").and_then(Value::as_str) {
                match action {
                    "final" => {
                        let response = map
                            .get("response")
                            .or_else(|| map.get("answer"))
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                ModelClientError::Malformed(
                                    "final action missing response field".into(),
                                )
                            })?;
                        Ok(ModelOutput::FinalAnswer {
                            text: response.to_string(),
                        })
                    }
                    "call_tools" => {
                        let calls = map
                            .get("calls")
                            .and_then(Value::as_array)
                            .ok_or_else(|| {
                                ModelClientError::Malformed(
                                    "call_tools action missing calls array".into(),
                                )
                            })?;
                        if calls.is_empty() {
                            return Err(ModelClientError::Malformed(
                                "call_tools action with no calls".into(),
                            ));
                        }
                        calls.iter().map(parse_call).collect::<Result<Vec<_>, _>>().map(
                            |calls| ModelOutput::ToolRequests { calls },
                        )
                    }
                    "call_tool" => {
                        let call = parse_call(&Value::Object(map))?;
                        Ok(ModelOutput::ToolRequests { calls: vec![call] })
                    }
                    other => Err(ModelClientError::Malformed(format!(
                        "unknown action value: {other}"
                    ))),
                }
            } else if map.contains_key("tool") {
                // Compatibility with the bare {"tool": ..., "args": ...}
                // shape some models fall back to.
                let call = parse_call(&Value::Object(map))?;
                Ok(ModelOutput::ToolRequests { calls: vec![call] })
            } else {
                Err(ModelClientError::Malformed(
                    "missing action field in model response".into(),
                ))
            }
        }
        Value::String(text) => parse_output(&text),
        other => Err(ModelClientError::Malformed(format!(
            "unsupported response type: {other}"
        ))),
    }
}

fn parse_call(value: &Value) -> Result<ToolCall, ModelClientError> {
    let map = value.as_object().ok_or_else(|| {
        ModelClientError::Malformed("tool call entry is not an object".into())
    })?;
    let tool = map
        .get("tool")
        .or_else(|| map.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ModelClientError::Malformed("tool call missing tool name".into()))?;
    let arguments = match map
        .get("input")
        .or_else(|| map.get("arguments"))
        .or_else(|| map.get("args"))
    {
        Some(Value::Object(args)) => args.clone(),
        Some(Value::Null) | None => JsonMap::new(),
        Some(other) => {
            warn!(tool, "Tool call arguments were not an object");
            return Err(ModelClientError::Malformed(format!(
                "tool call arguments must be an object, got {other}"
            )));
        }
    };
    Ok(ToolCall::new(tool, arguments))
}

fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}
