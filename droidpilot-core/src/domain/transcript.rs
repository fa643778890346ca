use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ToolCall, ToolResult};

/// What happened, without ordering information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    UserInstruction { text: String },
    ModelUtterance { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// One transcript line. The sequence number is the single source of truth
/// for "what happened when"; timestamps are informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TranscriptEvent,
}

/// Append-only ordered history of one task. Any prefix is a valid,
/// replayable history; there is deliberately no mutation API.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TranscriptEvent) -> TranscriptEntry {
        let entry = TranscriptEntry {
            seq: self.entries.len() as u64,
            at: Utc::now(),
            event,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
