//! adb-backed [`DeviceDriver`]. Every method is a single synchronous adb
//! invocation (or a short fixed sequence); timeouts are enforced by the
//! executor, not here.

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::device::{DeviceDriver, DriverError, ForegroundApp, KeyCode, Orientation};

const UI_DUMP_PATH: &str = "/sdcard/droidpilot_ui_dump.xml";

#[derive(Debug, Clone)]
pub struct AdbDriver {
    adb_path: String,
    serial: Option<String>,
}

impl AdbDriver {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let mut command = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command.args(args);
        debug!(?args, "Running adb command");
        let output = command
            .output()
            .await
            .map_err(|err| DriverError::Unavailable(format!("failed to run adb: {err}")))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(?args, stderr = stderr.as_str(), "adb command failed");
            Err(classify_adb_failure(stderr))
        }
    }

    async fn exec_text(&self, args: &[&str]) -> Result<String, DriverError> {
        let stdout = self.exec(args).await?;
        Ok(String::from_utf8_lossy(&stdout).trim_end().to_string())
    }

    async fn keyevent(&self, code: u32) -> Result<(), DriverError> {
        let code = code.to_string();
        self.exec(&["shell", "input", "keyevent", &code]).await?;
        Ok(())
    }
}

fn classify_adb_failure(stderr: String) -> DriverError {
    let lower = stderr.to_lowercase();
    if lower.contains("no devices")
        || lower.contains("device offline")
        || lower.contains("device not found")
        || lower.contains("cannot connect")
        || lower.contains("device unauthorized")
    {
        DriverError::Unavailable(stderr)
    } else {
        DriverError::InvalidState(stderr)
    }
}

/// `input text` treats space and shell metacharacters specially.
fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => escaped.push_str("%s"),
            '"' | '\'' | '`' | '\\' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn parse_screen_size(output: &str) -> Option<(u32, u32)> {
    // Prefer the override size when the display is scaled.
    let line = output
        .lines()
        .find(|line| line.contains("Override size:"))
        .or_else(|| output.lines().find(|line| line.contains("Physical size:")))?;
    let (_, dims) = line.rsplit_once(':')?;
    let (w, h) = dims.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn parse_foreground(output: &str) -> Option<ForegroundApp> {
    for line in output.lines() {
        if !(line.contains("ResumedActivity") || line.contains("mCurrentFocus")) {
            continue;
        }
        for token in line.split_whitespace() {
            if let Some((package, activity)) = token.split_once('/') {
                if package.contains('.') {
                    let activity = activity.trim_end_matches('}');
                    return Some(ForegroundApp {
                        package: package.to_string(),
                        activity: (!activity.is_empty()).then(|| activity.to_string()),
                    });
                }
            }
        }
    }
    None
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    async fn tap(&self, x: i64, y: i64) -> Result<(), DriverError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.exec(&["shell", "input", "tap", &x, &y]).await?;
        Ok(())
    }

    async fn long_press(&self, x: i64, y: i64, duration_ms: u64) -> Result<(), DriverError> {
        let (x, y, d) = (x.to_string(), y.to_string(), duration_ms.to_string());
        // A swipe that does not move is a long press.
        self.exec(&["shell", "input", "swipe", &x, &y, &x, &y, &d])
            .await?;
        Ok(())
    }

    async fn double_tap(&self, x: i64, y: i64) -> Result<(), DriverError> {
        self.tap(x, y).await?;
        self.tap(x, y).await
    }

    async fn swipe(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError> {
        let (sx, sy, ex, ey, d) = (
            sx.to_string(),
            sy.to_string(),
            ex.to_string(),
            ey.to_string(),
            duration_ms.to_string(),
        );
        self.exec(&["shell", "input", "swipe", &sx, &sy, &ex, &ey, &d])
            .await?;
        Ok(())
    }

    async fn drag(
        &self,
        sx: i64,
        sy: i64,
        ex: i64,
        ey: i64,
        duration_ms: u64,
    ) -> Result<(), DriverError> {
        let (sx, sy, ex, ey, d) = (
            sx.to_string(),
            sy.to_string(),
            ex.to_string(),
            ey.to_string(),
            duration_ms.to_string(),
        );
        self.exec(&["shell", "input", "draganddrop", &sx, &sy, &ex, &ey, &d])
            .await?;
        Ok(())
    }

    async fn key_event(&self, key: KeyCode) -> Result<(), DriverError> {
        self.keyevent(key.android_code()).await
    }

    async fn input_text(&self, text: &str) -> Result<(), DriverError> {
        let escaped = escape_input_text(text);
        self.exec(&["shell", "input", "text", &escaped]).await?;
        Ok(())
    }

    async fn clear_text(&self) -> Result<(), DriverError> {
        self.keyevent(KeyCode::MoveEnd.android_code()).await?;
        let burst = format!(
            "for i in $(seq 1 50); do input keyevent {}; done",
            KeyCode::Delete.android_code()
        );
        self.exec(&["shell", &burst]).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let bytes = self.exec(&["exec-out", "screencap", "-p"]).await?;
        if bytes.is_empty() {
            return Err(DriverError::InvalidState(
                "screencap produced no output".to_string(),
            ));
        }
        Ok(bytes)
    }

    async fn ui_hierarchy(&self) -> Result<String, DriverError> {
        self.exec(&["shell", "uiautomator", "dump", UI_DUMP_PATH])
            .await?;
        self.exec_text(&["exec-out", "cat", UI_DUMP_PATH]).await
    }

    async fn launch_app(&self, package: &str) -> Result<(), DriverError> {
        let output = self
            .exec_text(&[
                "shell",
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        if output.contains("No activities found") {
            return Err(DriverError::InvalidState(format!(
                "no launchable activity for package '{package}'"
            )));
        }
        Ok(())
    }

    async fn stop_app(&self, package: &str) -> Result<(), DriverError> {
        self.exec(&["shell", "am", "force-stop", package]).await?;
        Ok(())
    }

    async fn foreground_app(&self) -> Result<ForegroundApp, DriverError> {
        let output = self
            .exec_text(&["shell", "dumpsys", "activity", "activities"])
            .await?;
        parse_foreground(&output).ok_or_else(|| {
            DriverError::InvalidState("could not determine the foreground app".to_string())
        })
    }

    async fn list_packages(&self) -> Result<Vec<String>, DriverError> {
        let output = self.exec_text(&["shell", "pm", "list", "packages"]).await?;
        Ok(output
            .lines()
            .filter_map(|line| line.strip_prefix("package:"))
            .map(|name| name.trim().to_string())
            .collect())
    }

    async fn screen_size(&self) -> Result<(u32, u32), DriverError> {
        let output = self.exec_text(&["shell", "wm", "size"]).await?;
        parse_screen_size(&output).ok_or_else(|| {
            DriverError::InvalidState(format!("unparseable wm size output: {output}"))
        })
    }

    async fn set_screen(&self, on: bool) -> Result<(), DriverError> {
        let key = if on { KeyCode::Wakeup } else { KeyCode::Sleep };
        self.keyevent(key.android_code()).await
    }

    async fn unlock(&self) -> Result<(), DriverError> {
        self.keyevent(KeyCode::Wakeup.android_code()).await?;
        self.keyevent(KeyCode::Menu.android_code()).await
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), DriverError> {
        self.exec(&["shell", "cmd", "clipboard", "set-text", text])
            .await?;
        Ok(())
    }

    async fn get_clipboard(&self) -> Result<String, DriverError> {
        let output = self
            .exec_text(&["shell", "cmd", "clipboard", "get-text"])
            .await?;
        Ok(output)
    }

    async fn open_notifications(&self) -> Result<(), DriverError> {
        self.exec(&["shell", "cmd", "statusbar", "expand-notifications"])
            .await?;
        Ok(())
    }

    async fn orientation(&self) -> Result<Orientation, DriverError> {
        let output = self
            .exec_text(&["shell", "settings", "get", "system", "user_rotation"])
            .await?;
        let rotation: u32 = output.trim().parse().map_err(|_| {
            DriverError::InvalidState(format!("unparseable user_rotation value: {output}"))
        })?;
        Orientation::from_rotation(rotation).ok_or_else(|| {
            DriverError::InvalidState(format!("unknown rotation value: {rotation}"))
        })
    }

    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError> {
        self.exec(&[
            "shell",
            "settings",
            "put",
            "system",
            "accelerometer_rotation",
            "0",
        ])
        .await?;
        let rotation = orientation.rotation().to_string();
        self.exec(&["shell", "settings", "put", "system", "user_rotation", &rotation])
            .await?;
        Ok(())
    }

    async fn shell(&self, command: &str) -> Result<String, DriverError> {
        self.exec_text(&["shell", command]).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub is_emulator: bool,
}

/// Enumerate connected devices and emulators via `adb devices -l`.
pub async fn list_devices(adb_path: &str) -> Result<Vec<DeviceInfo>, DriverError> {
    let output = Command::new(adb_path)
        .args(["devices", "-l"])
        .output()
        .await
        .map_err(|err| DriverError::Unavailable(format!("failed to run adb: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(classify_adb_failure(stderr));
    }
    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_devices(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            let model = parts
                .find_map(|field| field.strip_prefix("model:"))
                .map(|model| model.to_string());
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
                model,
                is_emulator: serial.starts_with("emulator-"),
            })
        })
        .collect()
}
