//! Shared fakes for the integration scenarios: a scripted model provider
//! and a recording device driver, both observable from the outside.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use droidpilot_core::application::device::{
    DeviceDriver, DriverError, ForegroundApp, KeyCode, Orientation,
};
use droidpilot_core::domain::{ChatMessage, MessageRole};
use droidpilot_core::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct ScriptedProvider {
    responses: Arc<Mutex<Vec<String>>>,
    recordings: Arc<Mutex<Vec<ModelRequest>>>,
    delay: Arc<StdMutex<Option<Duration>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(String::from).collect(),
            )),
            recordings: Arc::new(Mutex::new(Vec::new())),
            delay: Arc::new(StdMutex::new(None)),
        }
    }

    /// Every subsequent model turn holds for this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Err(ModelError::invalid_response("scripted", "script exhausted"));
        }
        let response = responses.remove(0);
        self.recordings.lock().await.push(request.clone());
        Ok(ModelResponse {
            message: ChatMessage::new(MessageRole::Assistant, response),
        })
    }
}

/// Records every driver call; failures and a per-call delay are scriptable.
#[derive(Default)]
pub struct RecordingDriver {
    calls: StdMutex<Vec<String>>,
    failures: StdMutex<VecDeque<DriverError>>,
    delay: StdMutex<Option<Duration>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: DriverError) {
        self.failures.lock().expect("failures lock").push_back(error);
    }

    pub fn fail_next_times(&self, error: DriverError, times: usize) {
        let mut failures = self.failures.lock().expect("failures lock");
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }

    /// Every subsequent call holds for this long before returning.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn record(&self, call: impl Into<String>) -> Result<(), DriverError> {
        self.calls.lock().expect("calls lock").push(call.into());
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceDriver for RecordingDriver {
    fn serial(&self) -> Option<&str> {
        Some("emulator-5554")
    }

    async fn tap(&self, x: i64, y: i64) -> Result<(), DriverError> {
        self.record(format!("tap({x},{y})")).await
    }

    async fn long_press(&self, x: i64, y: i64, duration_ms: u64) -> Result<(), DriverError> {
        self.record(format!("long_press({x},{y},{duration_ms})")).await
    }

    async fn double_tap(&self, x: i64, y: i64) -> Result<(), DriverError> {
        self.record(format!("double_tap({x},{y})")).await
    }

    async fn swipe(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError> {
        self.record(format!("swipe({sx},{sy},{ex},{ey},{duration_ms})"))
            .await
    }

    async fn drag(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError> {
        self.record(format!("drag({sx},{sy},{ex},{ey},{duration_ms})"))
            .await
    }

    async fn key_event(&self, key: KeyCode) -> Result<(), DriverError> {
        self.record(format!("key_event({})", key.android_code())).await
    }

    async fn input_text(&self, text: &str) -> Result<(), DriverError> {
        self.record(format!("input_text({text})")).await
    }

    async fn clear_text(&self) -> Result<(), DriverError> {
        self.record("clear_text").await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.record("screenshot").await?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn ui_hierarchy(&self) -> Result<String, DriverError> {
        self.record("ui_hierarchy").await?;
        Ok("<hierarchy rotation=\"0\"/>".to_string())
    }

    async fn launch_app(&self, package: &str) -> Result<(), DriverError> {
        self.record(format!("launch_app({package})")).await
    }

    async fn stop_app(&self, package: &str) -> Result<(), DriverError> {
        self.record(format!("stop_app({package})")).await
    }

    async fn foreground_app(&self) -> Result<ForegroundApp, DriverError> {
        self.record("foreground_app").await?;
        Ok(ForegroundApp {
            package: "com.android.settings".to_string(),
            activity: Some(".Settings".to_string()),
        })
    }

    async fn list_packages(&self) -> Result<Vec<String>, DriverError> {
        self.record("list_packages").await?;
        Ok(vec!["com.android.settings".to_string()])
    }

    async fn screen_size(&self) -> Result<(u32, u32), DriverError> {
        self.record("screen_size").await?;
        Ok((1080, 2400))
    }

    async fn set_screen(&self, on: bool) -> Result<(), DriverError> {
        self.record(format!("set_screen({on})")).await
    }

    async fn unlock(&self) -> Result<(), DriverError> {
        self.record("unlock").await
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), DriverError> {
        self.record(format!("set_clipboard({text})")).await
    }

    async fn get_clipboard(&self) -> Result<String, DriverError> {
        self.record("get_clipboard").await?;
        Ok(String::new())
    }

    async fn open_notifications(&self) -> Result<(), DriverError> {
        self.record("open_notifications").await
    }

    async fn orientation(&self) -> Result<Orientation, DriverError> {
        self.record("orientation").await?;
        Ok(Orientation::Natural)
    }

    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError> {
        self.record(format!("set_orientation({})", orientation.as_str()))
            .await
    }

    async fn shell(&self, command: &str) -> Result<String, DriverError> {
        self.record(format!("shell({command})")).await?;
        Ok(String::new())
    }
}
