pub mod transcript;
pub mod types;

pub use transcript::{Transcript, TranscriptEntry, TranscriptEvent};
pub use types::{
    ChatMessage, FailureKind, JsonMap, MessageRole, Payload, ToolCall, ToolResult, ToolStatus,
};
