//! End-to-end loop scenarios against a scripted model and a recording
//! driver: completion, retries, ordering, cancellation, and escalation.

#[path = "../support/mod.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use droidpilot_core::application::agent::{AgentLoop, TaskStatus};
use droidpilot_core::application::catalog;
use droidpilot_core::application::client::ModelClient;
use droidpilot_core::application::device::DriverError;
use droidpilot_core::application::session::{DeviceGate, SessionContext};
use droidpilot_core::config::Limits;
use droidpilot_core::domain::{ToolStatus, TranscriptEvent};
use support::{RecordingDriver, ScriptedProvider};

fn agent(provider: ScriptedProvider) -> AgentLoop<ScriptedProvider> {
    let screenshot_dir = std::env::temp_dir().join("droidpilot-loop-tests");
    let registry = Arc::new(
        catalog::builtin(&screenshot_dir, &BTreeMap::new()).expect("catalog builds"),
    );
    let client = ModelClient::new(provider, "test-model", Duration::from_secs(5));
    AgentLoop::new(registry, client)
}

fn session(driver: Arc<RecordingDriver>, limits: Limits) -> SessionContext {
    let gate = DeviceGate::new();
    SessionContext::open(driver, &gate, limits).expect("session opens")
}

#[tokio::test]
async fn open_settings_scenario_ends_in_done() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"app_start","input":{"package":"com.android.settings"}}]}"#,
        r#"{"action":"final","response":"Settings app opened"}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("open Settings app", &mut session).await;

    assert_eq!(report.status, TaskStatus::Done);
    assert_eq!(report.answer.as_deref(), Some("Settings app opened"));
    assert_eq!(report.steps.len(), 1);
    assert!(report.steps[0].success);
    assert_eq!(report.iterations, 1);
    assert_eq!(
        driver.recorded(),
        vec!["launch_app(com.android.settings)".to_string()]
    );
    assert_eq!(provider.requests().await.len(), 2);
}

#[tokio::test]
async fn transient_timeouts_within_budget_recover() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"press","input":{"x":100,"y":200}}]}"#,
        r#"{"action":"final","response":"tapped it"}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    // Default budget is 2 retries; fail exactly twice, then succeed.
    driver.fail_next_times(DriverError::Timeout("input stalled".into()), 2);
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("tap the button", &mut session).await;

    assert_eq!(report.status, TaskStatus::Done);
    assert_eq!(report.answer.as_deref(), Some("tapped it"));
    assert_eq!(driver.recorded().len(), 3);
    assert_eq!(report.steps.len(), 3);
    assert!(!report.steps[0].success);
    assert!(!report.steps[1].success);
    assert!(report.steps[2].success);

    // The model saw the eventual success before answering.
    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    let last_turn = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(last_turn.contains("\"status\":\"ok\""));
}

#[tokio::test]
async fn timeouts_beyond_budget_fail_the_task() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"press","input":{"x":100,"y":200}}]}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    driver.fail_next_times(DriverError::Timeout("input stalled".into()), 3);
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("tap the button", &mut session).await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(
        report.diagnostic.as_deref(),
        Some("retry budget exhausted for tool 'press'")
    );
    // Original attempt plus two retries, no further model turns.
    assert_eq!(driver.recorded().len(), 3);
    assert_eq!(provider.requests().await.len(), 1);
    assert!(!report.transcript_tail.is_empty());
}

#[tokio::test]
async fn results_keep_the_order_the_model_emitted() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[
            {"tool":"press","input":{"x":1,"y":1}},
            {"tool":"press","input":{"x":2,"y":2}}
        ]}"#,
        r#"{"action":"final","response":"both tapped"}"#,
    ]);
    let agent = agent(provider);
    let driver = Arc::new(RecordingDriver::new());
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("tap twice", &mut session).await;
    assert_eq!(report.status, TaskStatus::Done);

    assert_eq!(
        driver.recorded(),
        vec!["tap(1,1)".to_string(), "tap(2,2)".to_string()]
    );

    let entries = session.transcript().entries().to_vec();
    let calls: Vec<_> = entries
        .iter()
        .filter_map(|e| match &e.event {
            TranscriptEvent::ToolCall(call) => Some((e.seq, call.call_id.clone())),
            _ => None,
        })
        .collect();
    let results: Vec<_> = entries
        .iter()
        .filter_map(|e| match &e.event {
            TranscriptEvent::ToolResult(result) => Some((e.seq, result.call_id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(results.len(), 2);
    // A's result strictly precedes B's, and pairing follows emission order.
    assert!(results[0].0 < results[1].0);
    assert_eq!(calls[0].1, results[0].1);
    assert_eq!(calls[1].1, results[1].1);
}

#[tokio::test]
async fn cancellation_lets_the_inflight_call_finish() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[
            {"tool":"press","input":{"x":1,"y":1}},
            {"tool":"press","input":{"x":2,"y":2}}
        ]}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    driver.set_delay(Duration::from_millis(300));
    let mut session = session(driver.clone(), Limits::default());

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = agent.run("tap twice", &mut session).await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.diagnostic.as_deref(), Some("cancelled"));
    // The first call ran to completion and its result was recorded; the
    // second call never started.
    assert_eq!(driver.recorded(), vec!["tap(1,1)".to_string()]);
    let results: Vec<_> = session
        .transcript()
        .entries()
        .iter()
        .filter(|e| matches!(e.event, TranscriptEvent::ToolResult(_)))
        .collect();
    assert_eq!(results.len(), 1);
    match &results[0].event {
        TranscriptEvent::ToolResult(result) => assert_eq!(result.status, ToolStatus::Ok),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn invalid_state_beyond_budget_returns_to_planning() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"press","input":{"x":1,"y":1}}]}"#,
        r#"{"action":"final","response":"the element is gone, nothing to tap"}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    driver.fail_next_times(DriverError::InvalidState("element not found".into()), 3);
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("tap the button", &mut session).await;

    // A state error that survives the retry budget goes back to the model
    // for a fresh plan instead of failing the task.
    assert_eq!(report.status, TaskStatus::Done);
    assert_eq!(driver.recorded().len(), 3);
    assert_eq!(report.steps.len(), 3);
    assert!(report.steps.iter().all(|s| !s.success));

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    let last_turn = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(last_turn.contains("element not found"));
}

#[tokio::test]
async fn wall_time_budget_fails_the_task() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"press","input":{"x":1,"y":1}}]}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    let limits = Limits {
        max_wall_time: Duration::ZERO,
        ..Limits::default()
    };
    let mut session = session(driver.clone(), limits);

    let report = agent.run("tap the button", &mut session).await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.diagnostic.as_deref(), Some("time limit exceeded"));
    // The already-issued call still ran and is on the record.
    assert_eq!(driver.recorded().len(), 1);
    assert!(!report.transcript_tail.is_empty());
}

#[tokio::test]
async fn cancellation_during_the_model_call_aborts_planning() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"final","response":"never delivered"}"#,
    ]);
    provider.set_delay(Duration::from_millis(300));
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    let mut session = session(driver.clone(), Limits::default());

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = agent.run("say hello", &mut session).await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.diagnostic.as_deref(), Some("cancelled"));
    assert!(driver.recorded().is_empty());
    assert!(report.steps.is_empty());
}

#[tokio::test]
async fn unknown_tool_request_feeds_back_into_planning() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tool","tool":"fly_to_moon","input":{}}"#,
        r#"{"action":"final","response":"that tool does not exist"}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("fly me to the moon", &mut session).await;

    assert_eq!(report.status, TaskStatus::Done);
    assert_eq!(report.steps.len(), 1);
    assert!(!report.steps[0].success);
    assert!(driver.recorded().is_empty());

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    let last_turn = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(last_turn.contains("unknown tool"));
}

#[tokio::test]
async fn device_unavailable_escalates_to_failed() {
    let provider = ScriptedProvider::new(vec![
        r#"{"action":"call_tools","calls":[{"tool":"press","input":{"x":1,"y":1}}]}"#,
    ]);
    let agent = agent(provider.clone());
    let driver = Arc::new(RecordingDriver::new());
    driver.fail_next(DriverError::Unavailable("device offline".into()));
    let mut session = session(driver.clone(), Limits::default());

    let report = agent.run("tap the button", &mut session).await;

    assert_eq!(report.status, TaskStatus::Failed);
    assert!(
        report
            .diagnostic
            .as_deref()
            .expect("diagnostic")
            .contains("device unavailable")
    );
    // No retries for a dead device.
    assert_eq!(driver.recorded().len(), 1);
    assert_eq!(provider.requests().await.len(), 1);
}
