//! Built-in Android tool catalog. Adding a tool is a registration call with
//! a schema and a handler; there is no tool type hierarchy.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use crate::application::device::{DeviceDriver, DriverError, KeyCode, Orientation};
use crate::application::registry::{
    ParamSpec, ParamType, RegistryError, ToolHandler, ToolRegistry, ToolSpec,
};
use crate::domain::{JsonMap, Payload};

// Natural timeouts per action class; overridable per tool from config.
const TIMEOUT_GESTURE: Duration = Duration::from_secs(10);
const TIMEOUT_QUERY: Duration = Duration::from_secs(10);
const TIMEOUT_SCREENSHOT: Duration = Duration::from_secs(15);
const TIMEOUT_APP: Duration = Duration::from_secs(20);
const TIMEOUT_SHELL: Duration = Duration::from_secs(30);
// Must exceed the largest accepted `wait` argument.
const TIMEOUT_WAIT: Duration = Duration::from_secs(35);

const MAX_COORDINATE: f64 = 100_000.0;
const MAX_WAIT_SECONDS: f64 = 30.0;

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Payload, DriverError>> + Send + 'a>>;
type HandlerFn = for<'a> fn(&'a dyn DeviceDriver, &'a JsonMap) -> HandlerFuture<'a>;

/// Adapter for stateless handlers expressed as free functions.
struct FnTool(HandlerFn);

#[async_trait]
impl ToolHandler for FnTool {
    async fn invoke(
        &self,
        driver: &dyn DeviceDriver,
        args: &JsonMap,
    ) -> Result<Payload, DriverError> {
        (self.0)(driver, args).await
    }
}

/// Captures the screen, writes a PNG under the configured directory, and
/// returns an image payload the model client can attach to requests.
struct ScreenshotTool {
    dir: PathBuf,
}

#[async_trait]
impl ToolHandler for ScreenshotTool {
    async fn invoke(
        &self,
        driver: &dyn DeviceDriver,
        _args: &JsonMap,
    ) -> Result<Payload, DriverError> {
        let bytes = driver.screenshot().await?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|err| DriverError::Other(format!("failed to create screenshot dir: {err}")))?;
        let name = format!("screen-{}.png", Utc::now().format("%Y%m%d-%H%M%S%3f"));
        let path = self.dir.join(name);
        std::fs::write(&path, &bytes)
            .map_err(|err| DriverError::Other(format!("failed to write screenshot: {err}")))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Screenshot captured");
        Ok(Payload::Image {
            path: path.display().to_string(),
            media_type: "image/png".to_string(),
            base64: BASE64.encode(&bytes),
        })
    }
}

/// Build the full catalog. `overrides` maps tool names to timeout seconds.
pub fn builtin(
    screenshot_dir: &Path,
    overrides: &BTreeMap<String, u64>,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    let mut specs = gesture_tools();
    specs.extend(input_tools());
    specs.extend(screen_tools(screenshot_dir));
    specs.extend(app_tools());
    specs.extend(system_tools());

    for mut spec in specs {
        if let Some(secs) = overrides.get(&spec.name) {
            spec.timeout = Duration::from_secs(*secs);
        }
        registry.register(spec)?;
    }
    Ok(registry)
}

fn tool(name: &str, description: &str, timeout: Duration, f: HandlerFn) -> ToolSpec {
    ToolSpec::new(name, description, timeout, Arc::new(FnTool(f)))
}

fn coordinate(description: &str) -> ParamSpec {
    ParamSpec::required(ParamType::Integer, description).range(0.0, MAX_COORDINATE)
}

fn gesture_tools() -> Vec<ToolSpec> {
    vec![
        tool(
            "press",
            "Tap the screen at the given coordinates.",
            TIMEOUT_GESTURE,
            press,
        )
        .param("x", coordinate("Horizontal pixel position"))
        .param("y", coordinate("Vertical pixel position")),
        tool(
            "long_press",
            "Press and hold at the given coordinates.",
            TIMEOUT_GESTURE,
            long_press,
        )
        .param("x", coordinate("Horizontal pixel position"))
        .param("y", coordinate("Vertical pixel position"))
        .param(
            "duration_ms",
            ParamSpec::optional(ParamType::Integer, "Hold duration in milliseconds").min(1.0),
        ),
        tool(
            "double_click",
            "Tap the same point twice in quick succession.",
            TIMEOUT_GESTURE,
            double_click,
        )
        .param("x", coordinate("Horizontal pixel position"))
        .param("y", coordinate("Vertical pixel position")),
        tool(
            "swipe",
            "Swipe from a start point to an end point.",
            TIMEOUT_GESTURE,
            swipe,
        )
        .param("start_x", coordinate("Swipe origin x"))
        .param("start_y", coordinate("Swipe origin y"))
        .param("end_x", coordinate("Swipe destination x"))
        .param("end_y", coordinate("Swipe destination y"))
        .param(
            "duration_ms",
            ParamSpec::optional(ParamType::Integer, "Swipe duration in milliseconds").min(1.0),
        ),
        tool(
            "drag",
            "Drag from a start point to an end point, holding before release.",
            TIMEOUT_GESTURE,
            drag,
        )
        .param("start_x", coordinate("Drag origin x"))
        .param("start_y", coordinate("Drag origin y"))
        .param("end_x", coordinate("Drag destination x"))
        .param("end_y", coordinate("Drag destination y"))
        .param(
            "duration_ms",
            ParamSpec::optional(ParamType::Integer, "Drag duration in milliseconds").min(1.0),
        ),
        tool(
            "press_back",
            "Press the hardware back button.",
            TIMEOUT_GESTURE,
            press_back,
        ),
        tool(
            "press_home",
            "Press the home button.",
            TIMEOUT_GESTURE,
            press_home,
        ),
    ]
}

fn input_tools() -> Vec<ToolSpec> {
    vec![
        tool(
            "type_text",
            "Type text into the focused input field.",
            TIMEOUT_GESTURE,
            type_text,
        )
        .param("text", ParamSpec::required(ParamType::String, "Text to type")),
        tool(
            "clear_text",
            "Clear the focused input field.",
            TIMEOUT_GESTURE,
            clear_text,
        ),
        tool(
            "set_clipboard",
            "Put text on the device clipboard.",
            TIMEOUT_GESTURE,
            set_clipboard,
        )
        .param(
            "text",
            ParamSpec::required(ParamType::String, "Clipboard content"),
        ),
        tool(
            "get_clipboard",
            "Read the device clipboard.",
            TIMEOUT_QUERY,
            get_clipboard,
        ),
    ]
}

fn screen_tools(screenshot_dir: &Path) -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "take_screenshot",
            "Capture the current screen as a PNG image.",
            TIMEOUT_SCREENSHOT,
            Arc::new(ScreenshotTool {
                dir: screenshot_dir.to_path_buf(),
            }),
        ),
        tool(
            "get_ui_elements",
            "Dump the UI hierarchy of the current screen as XML.",
            TIMEOUT_QUERY,
            get_ui_elements,
        ),
        tool(
            "get_device_dimensions",
            "Report the screen size in pixels.",
            TIMEOUT_QUERY,
            get_device_dimensions,
        ),
        tool(
            "get_orientation",
            "Report the current screen orientation.",
            TIMEOUT_QUERY,
            get_orientation,
        ),
        tool(
            "set_orientation",
            "Rotate the screen to the given orientation.",
            TIMEOUT_GESTURE,
            set_orientation,
        )
        .param(
            "orientation",
            ParamSpec::required(ParamType::String, "Target orientation")
                .one_of(&["natural", "left", "right", "upsidedown"]),
        ),
    ]
}

fn app_tools() -> Vec<ToolSpec> {
    vec![
        tool(
            "app_start",
            "Start an app by package name, e.g. com.android.settings.",
            TIMEOUT_APP,
            app_start,
        )
        .param(
            "package",
            ParamSpec::required(ParamType::String, "Android package name"),
        ),
        tool(
            "app_stop",
            "Force-stop an app by package name.",
            TIMEOUT_APP,
            app_stop,
        )
        .param(
            "package",
            ParamSpec::required(ParamType::String, "Android package name"),
        ),
        tool(
            "app_current",
            "Report the app currently in the foreground.",
            TIMEOUT_QUERY,
            app_current,
        ),
        tool(
            "app_list",
            "List installed packages.",
            TIMEOUT_QUERY,
            app_list,
        ),
    ]
}

fn system_tools() -> Vec<ToolSpec> {
    vec![
        tool("screen_on", "Wake the screen.", TIMEOUT_GESTURE, screen_on),
        tool(
            "screen_off",
            "Turn the screen off.",
            TIMEOUT_GESTURE,
            screen_off,
        ),
        tool(
            "unlock",
            "Wake and unlock the device.",
            TIMEOUT_GESTURE,
            unlock,
        ),
        tool(
            "open_notification",
            "Expand the notification shade.",
            TIMEOUT_GESTURE,
            open_notification,
        ),
        tool(
            "wait",
            "Pause before the next action, e.g. while an app is loading.",
            TIMEOUT_WAIT,
            wait,
        )
        .param(
            "seconds",
            ParamSpec::required(ParamType::Number, "How long to wait")
                .range(0.0, MAX_WAIT_SECONDS),
        ),
        tool(
            "shell",
            "Run a shell command on the device and return its output.",
            TIMEOUT_SHELL,
            shell,
        )
        .param(
            "command",
            ParamSpec::required(ParamType::String, "Shell command line"),
        ),
    ]
}

// Argument access. The executor validates against the schema before the
// handler runs, so a miss here is an internal inconsistency, not user error.

fn int_arg(args: &JsonMap, name: &str) -> Result<i64, DriverError> {
    args.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| DriverError::Other(format!("argument '{name}' missing after validation")))
}

fn opt_int(args: &JsonMap, name: &str, default: i64) -> i64 {
    args.get(name).and_then(Value::as_i64).unwrap_or(default)
}

fn str_arg<'a>(args: &'a JsonMap, name: &str) -> Result<&'a str, DriverError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Other(format!("argument '{name}' missing after validation")))
}

fn num_arg(args: &JsonMap, name: &str) -> Result<f64, DriverError> {
    args.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| DriverError::Other(format!("argument '{name}' missing after validation")))
}

fn text(text: impl Into<String>) -> Payload {
    Payload::Text { text: text.into() }
}

fn press<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let x = int_arg(args, "x")?;
        let y = int_arg(args, "y")?;
        driver.tap(x, y).await?;
        Ok(text(format!("tapped ({x}, {y})")))
    })
}

fn long_press<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let x = int_arg(args, "x")?;
        let y = int_arg(args, "y")?;
        let duration = opt_int(args, "duration_ms", 800) as u64;
        driver.long_press(x, y, duration).await?;
        Ok(text(format!("long-pressed ({x}, {y}) for {duration}ms")))
    })
}

fn double_click<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let x = int_arg(args, "x")?;
        let y = int_arg(args, "y")?;
        driver.double_tap(x, y).await?;
        Ok(text(format!("double-clicked ({x}, {y})")))
    })
}

fn swipe<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let sx = int_arg(args, "start_x")?;
        let sy = int_arg(args, "start_y")?;
        let ex = int_arg(args, "end_x")?;
        let ey = int_arg(args, "end_y")?;
        let duration = opt_int(args, "duration_ms", 300) as u64;
        driver.swipe(sx, sy, ex, ey, duration).await?;
        Ok(text(format!("swiped ({sx}, {sy}) -> ({ex}, {ey})")))
    })
}

fn drag<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let sx = int_arg(args, "start_x")?;
        let sy = int_arg(args, "start_y")?;
        let ex = int_arg(args, "end_x")?;
        let ey = int_arg(args, "end_y")?;
        let duration = opt_int(args, "duration_ms", 1000) as u64;
        driver.drag(sx, sy, ex, ey, duration).await?;
        Ok(text(format!("dragged ({sx}, {sy}) -> ({ex}, {ey})")))
    })
}

fn press_back<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.key_event(KeyCode::Back).await?;
        Ok(text("pressed back"))
    })
}

fn press_home<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.key_event(KeyCode::Home).await?;
        Ok(text("pressed home"))
    })
}

fn type_text<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let content = str_arg(args, "text")?;
        driver.input_text(content).await?;
        Ok(text(format!("typed {} characters", content.chars().count())))
    })
}

fn clear_text<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.clear_text().await?;
        Ok(text("cleared input field"))
    })
}

fn set_clipboard<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let content = str_arg(args, "text")?;
        driver.set_clipboard(content).await?;
        Ok(text("clipboard set"))
    })
}

fn get_clipboard<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let content = driver.get_clipboard().await?;
        Ok(text(content))
    })
}

fn get_ui_elements<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let xml = driver.ui_hierarchy().await?;
        Ok(text(xml))
    })
}

fn get_device_dimensions<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (width, height) = driver.screen_size().await?;
        Ok(Payload::Json {
            value: json!({ "width": width, "height": height }),
        })
    })
}

fn get_orientation<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let orientation = driver.orientation().await?;
        Ok(text(orientation.as_str()))
    })
}

fn set_orientation<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let raw = str_arg(args, "orientation")?;
        let orientation = Orientation::from_str(raw)
            .ok_or_else(|| DriverError::Other(format!("unsupported orientation '{raw}'")))?;
        driver.set_orientation(orientation).await?;
        Ok(text(format!("orientation set to {raw}")))
    })
}

fn app_start<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let package = str_arg(args, "package")?;
        driver.launch_app(package).await?;
        Ok(text(format!("started {package}")))
    })
}

fn app_stop<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let package = str_arg(args, "package")?;
        driver.stop_app(package).await?;
        Ok(text(format!("stopped {package}")))
    })
}

fn app_current<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let app = driver.foreground_app().await?;
        Ok(Payload::Json {
            value: serde_json::to_value(&app)
                .map_err(|err| DriverError::Other(err.to_string()))?,
        })
    })
}

fn app_list<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let packages = driver.list_packages().await?;
        Ok(Payload::Json {
            value: json!({ "count": packages.len(), "packages": packages }),
        })
    })
}

fn screen_on<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.set_screen(true).await?;
        Ok(text("screen on"))
    })
}

fn screen_off<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.set_screen(false).await?;
        Ok(text("screen off"))
    })
}

fn unlock<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.unlock().await?;
        Ok(text("device unlocked"))
    })
}

fn open_notification<'a>(driver: &'a dyn DeviceDriver, _args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        driver.open_notifications().await?;
        Ok(text("notification shade opened"))
    })
}

fn wait<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let _ = driver;
        let seconds = num_arg(args, "seconds")?;
        tokio::time::sleep(Duration::from_secs_f64(seconds.clamp(0.0, MAX_WAIT_SECONDS))).await;
        Ok(text(format!("waited {seconds} seconds")))
    })
}

fn shell<'a>(driver: &'a dyn DeviceDriver, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let command = str_arg(args, "command")?;
        let output = driver.shell(command).await?;
        Ok(text(output))
    })
}
