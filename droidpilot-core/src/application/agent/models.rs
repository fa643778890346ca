use serde::{Deserialize, Serialize};

use crate::domain::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Done,
    Failed,
}

/// One line per tool invocation, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub tool: String,
    pub call_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Final outcome handed to the presentation layer. Failures carry the
/// terminating reason and the transcript tail, never a raw error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub summary: String,
    pub steps: Vec<StepSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcript_tail: Vec<TranscriptEntry>,
    pub iterations: u32,
}

impl TaskReport {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}
