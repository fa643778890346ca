//! Device driver port. The executor and the built-in catalog talk to the
//! device exclusively through [`DeviceDriver`]; the adb-backed adapter lives
//! in [`crate::infrastructure::adb`].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Classified driver failure. The executor maps these onto
/// [`crate::domain::FailureKind`]; drivers pick the variant that matches
/// what the device reported, not what the caller did wrong.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("device rejected the action: {0}")]
    InvalidState(String),
    #[error("device action timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Back,
    Home,
    Menu,
    Delete,
    MoveEnd,
    Wakeup,
    Sleep,
}

impl KeyCode {
    /// Android `KeyEvent` code as understood by `input keyevent`.
    pub fn android_code(self) -> u32 {
        match self {
            KeyCode::Back => 4,
            KeyCode::Home => 3,
            KeyCode::Menu => 82,
            KeyCode::Delete => 67,
            KeyCode::MoveEnd => 123,
            KeyCode::Wakeup => 224,
            KeyCode::Sleep => 223,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Natural,
    Left,
    Right,
    UpsideDown,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Natural => "natural",
            Orientation::Left => "left",
            Orientation::Right => "right",
            Orientation::UpsideDown => "upsidedown",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "natural" => Some(Orientation::Natural),
            "left" => Some(Orientation::Left),
            "right" => Some(Orientation::Right),
            "upsidedown" => Some(Orientation::UpsideDown),
            _ => None,
        }
    }

    /// `user_rotation` value in Android system settings.
    pub fn rotation(self) -> u32 {
        match self {
            Orientation::Natural => 0,
            Orientation::Left => 1,
            Orientation::UpsideDown => 2,
            Orientation::Right => 3,
        }
    }

    pub fn from_rotation(value: u32) -> Option<Self> {
        match value {
            0 => Some(Orientation::Natural),
            1 => Some(Orientation::Left),
            2 => Some(Orientation::UpsideDown),
            3 => Some(Orientation::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForegroundApp {
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
}

/// One synchronous request per method call, bounded by the executor's
/// per-tool timeout. Implementations must not retry internally.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn serial(&self) -> Option<&str>;

    async fn tap(&self, x: i64, y: i64) -> Result<(), DriverError>;
    async fn long_press(&self, x: i64, y: i64, duration_ms: u64) -> Result<(), DriverError>;
    async fn double_tap(&self, x: i64, y: i64) -> Result<(), DriverError>;
    async fn swipe(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError>;
    async fn drag(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError>;
    async fn key_event(&self, key: KeyCode) -> Result<(), DriverError>;
    async fn input_text(&self, text: &str) -> Result<(), DriverError>;
    async fn clear_text(&self) -> Result<(), DriverError>;

    /// PNG-encoded screen capture.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
    /// UI hierarchy dump as uiautomator XML.
    async fn ui_hierarchy(&self) -> Result<String, DriverError>;

    async fn launch_app(&self, package: &str) -> Result<(), DriverError>;
    async fn stop_app(&self, package: &str) -> Result<(), DriverError>;
    async fn foreground_app(&self) -> Result<ForegroundApp, DriverError>;
    async fn list_packages(&self) -> Result<Vec<String>, DriverError>;

    async fn screen_size(&self) -> Result<(u32, u32), DriverError>;
    async fn set_screen(&self, on: bool) -> Result<(), DriverError>;
    async fn unlock(&self) -> Result<(), DriverError>;
    async fn set_clipboard(&self, text: &str) -> Result<(), DriverError>;
    async fn get_clipboard(&self) -> Result<String, DriverError>;
    async fn open_notifications(&self) -> Result<(), DriverError>;
    async fn orientation(&self) -> Result<Orientation, DriverError>;
    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError>;

    async fn shell(&self, command: &str) -> Result<String, DriverError>;
}
