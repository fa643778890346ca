//! Executor behavior through the public API: rejection before the device is
//! touched, classified failures, and usable sessions after a timeout.

#[path = "../support/mod.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use droidpilot_core::application::catalog;
use droidpilot_core::application::device::DriverError;
use droidpilot_core::application::executor::ToolExecutor;
use droidpilot_core::application::session::{DeviceGate, SessionContext};
use droidpilot_core::config::Limits;
use droidpilot_core::domain::{FailureKind, JsonMap, ToolCall, ToolStatus};
use serde_json::{Value, json};
use support::RecordingDriver;

fn executor() -> ToolExecutor {
    let screenshot_dir = std::env::temp_dir().join("droidpilot-executor-tests");
    let registry =
        catalog::builtin(&screenshot_dir, &BTreeMap::new()).expect("catalog builds");
    ToolExecutor::new(Arc::new(registry))
}

fn call(tool: &str, arguments: Value) -> ToolCall {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    };
    ToolCall::new(tool, arguments)
}

fn open_session(driver: Arc<RecordingDriver>) -> SessionContext {
    let gate = DeviceGate::new();
    SessionContext::open(driver, &gate, Limits::default()).expect("session opens")
}

#[tokio::test]
async fn unregistered_tool_never_reaches_the_driver() {
    let driver = Arc::new(RecordingDriver::new());
    let session = open_session(driver.clone());

    let result = executor()
        .execute(&call("reboot_into_orbit", json!({})), &session)
        .await;

    assert_eq!(result.status, ToolStatus::Error);
    assert_eq!(result.failure, Some(FailureKind::UnknownTool));
    assert!(
        result
            .error_detail
            .expect("detail")
            .contains("unknown tool")
    );
    assert!(driver.recorded().is_empty());
}

#[tokio::test]
async fn validation_failures_name_the_offending_parameter() {
    let driver = Arc::new(RecordingDriver::new());
    let session = open_session(driver.clone());
    let executor = executor();

    let missing = executor
        .execute(&call("app_start", json!({})), &session)
        .await;
    assert_eq!(missing.failure, Some(FailureKind::Validation));
    assert!(
        missing
            .error_detail
            .expect("detail")
            .contains("missing required parameter 'package'")
    );

    let wrong_type = executor
        .execute(&call("app_start", json!({ "package": 7 })), &session)
        .await;
    assert!(
        wrong_type
            .error_detail
            .expect("detail")
            .contains("parameter 'package' expects string")
    );

    assert!(driver.recorded().is_empty());
}

#[tokio::test]
async fn session_stays_usable_after_a_classified_failure() {
    let driver = Arc::new(RecordingDriver::new());
    let session = open_session(driver.clone());
    let executor = executor();

    driver.fail_next(DriverError::Timeout("input stalled".into()));
    let first = executor
        .execute(&call("press", json!({ "x": 5, "y": 6 })), &session)
        .await;
    assert_eq!(first.failure, Some(FailureKind::Timeout));

    let second = executor
        .execute(&call("press", json!({ "x": 5, "y": 6 })), &session)
        .await;
    assert_eq!(second.status, ToolStatus::Ok);
    assert_eq!(driver.recorded().len(), 2);
}

#[tokio::test]
async fn each_call_is_dispatched_exactly_once() {
    let driver = Arc::new(RecordingDriver::new());
    let session = open_session(driver.clone());
    let executor = executor();

    driver.fail_next(DriverError::InvalidState("element not found".into()));
    let result = executor
        .execute(&call("press", json!({ "x": 10, "y": 20 })), &session)
        .await;

    // One failure, one interaction: the executor never retries on its own.
    assert_eq!(result.failure, Some(FailureKind::InvalidState));
    assert_eq!(driver.recorded(), vec!["tap(10,20)".to_string()]);
}
