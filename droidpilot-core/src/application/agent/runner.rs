use std::sync::Arc;

use tracing::{debug, info, warn};

use super::models::{StepSummary, TaskReport, TaskStatus};
use super::state::AgentState;
use crate::application::client::{ModelClient, ModelClientError, ModelOutput};
use crate::application::executor::ToolExecutor;
use crate::application::registry::ToolRegistry;
use crate::application::session::SessionContext;
use crate::constants::FAILURE_TAIL_LEN;
use crate::domain::{FailureKind, ToolCall, ToolResult, TranscriptEvent};
use crate::model::ModelProvider;

const REPROMPT_NOTE: &str = "Your previous reply could not be parsed. Respond with a single JSON object: either {\"action\":\"call_tools\",\"calls\":[...]} or {\"action\":\"final\",\"response\":\"...\"}.";

/// Phase data for the running state machine. Terminal states return a
/// report instead of a next phase.
enum Phase {
    Planning,
    Executing {
        /// (call, prior attempts for this logical call)
        pending: Vec<(ToolCall, u32)>,
    },
    Verifying {
        executed: Vec<(ToolCall, u32)>,
        results: Vec<ToolResult>,
    },
    Reporting {
        answer: String,
    },
}

/// The PLAN -> EXECUTE -> VERIFY -> REPORT cycle. Retry and abort policy
/// lives entirely in the Verifying arm; the executor and model client only
/// report typed outcomes.
pub struct AgentLoop<P: ModelProvider> {
    registry: Arc<ToolRegistry>,
    client: ModelClient<P>,
    executor: ToolExecutor,
}

impl<P: ModelProvider> AgentLoop<P> {
    pub fn new(registry: Arc<ToolRegistry>, client: ModelClient<P>) -> Self {
        let executor = ToolExecutor::new(registry.clone());
        Self {
            registry,
            client,
            executor,
        }
    }

    pub async fn run(
        &self,
        instruction: impl Into<String>,
        session: &mut SessionContext,
    ) -> TaskReport {
        let instruction = instruction.into();
        info!(session = session.id(), "Task started");
        session.record(TranscriptEvent::UserInstruction { text: instruction });

        let cancel = session.cancel_handle();
        let mut steps: Vec<StepSummary> = Vec::new();
        let mut reprompted = false;
        let mut phase = Phase::Planning;

        loop {
            phase = match phase {
                Phase::Planning => {
                    debug!(state = AgentState::Planning.as_str(), "Entering state");
                    if cancel.is_cancelled() {
                        return self.failed(session, steps, "cancelled");
                    }
                    // The model call is the sole cancellation point with an
                    // in-flight abort; tool calls always run to completion.
                    let output = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.failed(session, steps, "cancelled");
                        }
                        output = self.client.plan(session.transcript(), &self.registry) => output,
                    };
                    match output {
                        Ok(ModelOutput::FinalAnswer { text }) => {
                            session.record(TranscriptEvent::ModelUtterance { text: text.clone() });
                            Phase::Reporting { answer: text }
                        }
                        Ok(ModelOutput::ToolRequests { calls }) => {
                            session.begin_iteration();
                            let mut pending = Vec::with_capacity(calls.len());
                            for call in calls {
                                session.record(TranscriptEvent::ToolCall(call.clone()));
                                pending.push((call, 0));
                            }
                            Phase::Executing { pending }
                        }
                        Err(ModelClientError::Malformed(reason)) if !reprompted => {
                            warn!(%reason, "Model response could not be parsed; re-prompting once");
                            reprompted = true;
                            session.record(TranscriptEvent::UserInstruction {
                                text: REPROMPT_NOTE.to_string(),
                            });
                            Phase::Planning
                        }
                        Err(ModelClientError::Malformed(reason)) => {
                            return self.failed(
                                session,
                                steps,
                                format!("model response could not be parsed: {reason}"),
                            );
                        }
                        Err(ModelClientError::Provider(err)) => {
                            return self.failed(
                                session,
                                steps,
                                format!("model request failed: {}", err.user_message()),
                            );
                        }
                    }
                }
                Phase::Executing { pending } => {
                    debug!(
                        state = AgentState::Executing.as_str(),
                        calls = pending.len(),
                        "Entering state"
                    );
                    // Sequential by contract: later calls may depend on the
                    // on-screen state left by earlier ones.
                    let mut results = Vec::with_capacity(pending.len());
                    for (call, _) in &pending {
                        let result = self.executor.execute(call, session).await;
                        session.record(TranscriptEvent::ToolResult(result.clone()));
                        steps.push(StepSummary {
                            tool: result.tool.clone(),
                            call_id: result.call_id.clone(),
                            success: result.is_ok(),
                            detail: result.error_detail.clone(),
                        });
                        results.push(result);
                        if cancel.is_cancelled() {
                            break;
                        }
                    }
                    Phase::Verifying {
                        executed: pending,
                        results,
                    }
                }
                Phase::Verifying { executed, results } => {
                    debug!(state = AgentState::Verifying.as_str(), "Entering state");
                    if cancel.is_cancelled() {
                        return self.failed(session, steps, "cancelled");
                    }
                    if results.len() != executed.len() {
                        return self.failed(
                            session,
                            steps,
                            "internal: a requested tool produced no result",
                        );
                    }
                    if let Some(result) = results
                        .iter()
                        .find(|r| r.failure == Some(FailureKind::DeviceUnavailable))
                    {
                        return self.failed(
                            session,
                            steps,
                            format!(
                                "device unavailable during '{}': {}",
                                result.tool,
                                result.error_detail.clone().unwrap_or_default()
                            ),
                        );
                    }

                    let limits = session.limits().clone();
                    if session.elapsed() >= limits.max_wall_time {
                        return self.failed(session, steps, "time limit exceeded");
                    }

                    let mut retries = Vec::new();
                    for ((call, attempt), result) in executed.iter().zip(&results) {
                        match result.failure {
                            Some(FailureKind::Timeout) if *attempt < limits.retry_budget => {
                                retries.push((call.reissued(), attempt + 1));
                            }
                            Some(FailureKind::Timeout) => {
                                return self.failed(
                                    session,
                                    steps,
                                    format!("retry budget exhausted for tool '{}'", call.tool),
                                );
                            }
                            // InvalidState retries within the same budget;
                            // once exhausted the model re-plans instead.
                            Some(FailureKind::InvalidState)
                                if *attempt < limits.retry_budget =>
                            {
                                retries.push((call.reissued(), attempt + 1));
                            }
                            _ => {}
                        }
                    }

                    if !retries.is_empty() {
                        info!(retries = retries.len(), "Re-issuing failed calls");
                        let mut pending = Vec::with_capacity(retries.len());
                        for (call, attempt) in retries {
                            session.record(TranscriptEvent::ToolCall(call.clone()));
                            pending.push((call, attempt));
                        }
                        Phase::Executing { pending }
                    } else if session.iterations() >= limits.max_iterations {
                        return self.failed(session, steps, "iteration limit exceeded");
                    } else {
                        Phase::Planning
                    }
                }
                Phase::Reporting { answer } => {
                    debug!(state = AgentState::Reporting.as_str(), "Entering state");
                    info!(
                        session = session.id(),
                        iterations = session.iterations(),
                        steps = steps.len(),
                        "Task done"
                    );
                    return TaskReport {
                        status: TaskStatus::Done,
                        answer: Some(answer),
                        summary: summarize(&steps, session.iterations()),
                        steps,
                        diagnostic: None,
                        transcript_tail: Vec::new(),
                        iterations: session.iterations(),
                    };
                }
            };
        }
    }

    fn failed(
        &self,
        session: &SessionContext,
        steps: Vec<StepSummary>,
        reason: impl Into<String>,
    ) -> TaskReport {
        let reason = reason.into();
        warn!(session = session.id(), %reason, "Task failed");
        TaskReport {
            status: TaskStatus::Failed,
            answer: None,
            summary: summarize(&steps, session.iterations()),
            steps,
            diagnostic: Some(reason),
            transcript_tail: session.transcript().tail(FAILURE_TAIL_LEN).to_vec(),
            iterations: session.iterations(),
        }
    }
}

fn summarize(steps: &[StepSummary], iterations: u32) -> String {
    if steps.is_empty() {
        return format!("no tool calls over {iterations} iteration(s)");
    }
    let succeeded = steps.iter().filter(|s| s.success).count();
    format!(
        "{} tool call(s), {} succeeded, over {} iteration(s)",
        steps.len(),
        succeeded,
        iterations
    )
}
