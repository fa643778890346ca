//! Session exclusivity and lifecycle through the public API.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use droidpilot_core::application::session::{DeviceGate, SessionContext, SessionError};
use droidpilot_core::config::Limits;
use droidpilot_core::domain::TranscriptEvent;
use support::RecordingDriver;

fn driver() -> Arc<RecordingDriver> {
    Arc::new(RecordingDriver::new())
}

#[tokio::test]
async fn concurrent_open_on_one_device_is_rejected() {
    let gate = DeviceGate::new();
    let held = SessionContext::open(driver(), &gate, Limits::default()).expect("first open");

    let err = SessionContext::open(driver(), &gate, Limits::default())
        .expect_err("second open while held");
    assert!(matches!(err, SessionError::DeviceBusy));

    drop(held);
    assert!(SessionContext::open(driver(), &gate, Limits::default()).is_ok());
}

#[tokio::test]
async fn open_close_open_round_trips() {
    let gate = DeviceGate::new();

    let session = SessionContext::open(driver(), &gate, Limits::default()).expect("open");
    let id = session.id().to_string();
    let transcript = session.close();
    assert!(transcript.is_empty());

    let reopened = SessionContext::open(driver(), &gate, Limits::default()).expect("reopen");
    assert_ne!(reopened.id(), id);
}

#[tokio::test]
async fn transcript_and_events_mirror_each_other() {
    let gate = DeviceGate::new();
    let mut session = SessionContext::open(driver(), &gate, Limits::default()).expect("open");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    session.set_event_sink(tx);

    session.record(TranscriptEvent::UserInstruction {
        text: "open Settings app".into(),
    });
    session.record(TranscriptEvent::ModelUtterance {
        text: "working on it".into(),
    });

    let first = rx.recv().await.expect("first event");
    let second = rx.recv().await.expect("second event");
    assert_eq!(first.seq, 0);
    assert_eq!(second.seq, 1);
    assert_eq!(session.transcript().len(), 2);

    // Dropping the session closes the stream.
    drop(session);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn iteration_counter_is_monotonic() {
    let gate = DeviceGate::new();
    let mut session = SessionContext::open(driver(), &gate, Limits::default()).expect("open");
    assert_eq!(session.iterations(), 0);
    assert_eq!(session.begin_iteration(), 1);
    assert_eq!(session.begin_iteration(), 2);
    assert_eq!(session.iterations(), 2);
}
