//! Validates and dispatches a single tool call. Every outcome is returned
//! as a [`ToolResult`]; failures never cross this boundary as errors, and
//! retry policy lives in the agent loop, not here.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::device::DriverError;
use crate::application::registry::{ToolRegistry, ToolSpec};
use crate::application::session::SessionContext;
use crate::domain::{FailureKind, JsonMap, ToolCall, ToolResult};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Exactly one device interaction per call. Unknown names and invalid
    /// arguments are rejected before the device is touched.
    pub async fn execute(&self, call: &ToolCall, session: &SessionContext) -> ToolResult {
        let spec = match self.registry.resolve(&call.tool) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(tool = %call.tool, "Rejected call to unregistered tool");
                return ToolResult::error(call, FailureKind::UnknownTool, err.to_string());
            }
        };

        if let Err(detail) = validate(&spec, &call.arguments) {
            warn!(tool = %call.tool, %detail, "Rejected call with invalid arguments");
            return ToolResult::error(call, FailureKind::Validation, detail);
        }

        debug!(tool = %call.tool, call_id = %call.call_id, "Dispatching tool call");
        let driver = session.driver();
        match timeout(
            spec.timeout,
            spec.handler().invoke(driver.as_ref(), &call.arguments),
        )
        .await
        {
            Ok(Ok(payload)) => {
                info!(tool = %call.tool, call_id = %call.call_id, "Tool executed");
                ToolResult::ok(call, payload)
            }
            Ok(Err(err)) => {
                let kind = classify(&err);
                warn!(tool = %call.tool, failure = kind.as_str(), %err, "Tool failed");
                ToolResult::error(call, kind, err.to_string())
            }
            Err(_) => {
                // The handler future is dropped here; the device session
                // itself stays usable for subsequent calls.
                warn!(tool = %call.tool, timeout = ?spec.timeout, "Tool timed out");
                ToolResult::error(call, FailureKind::Timeout, "timeout")
            }
        }
    }
}

fn classify(err: &DriverError) -> FailureKind {
    match err {
        DriverError::Unavailable(_) => FailureKind::DeviceUnavailable,
        DriverError::InvalidState(_) => FailureKind::InvalidState,
        DriverError::Timeout(_) => FailureKind::Timeout,
        DriverError::Other(_) => FailureKind::Unknown,
    }
}

/// Schema check with a distinct message per failure mode, so callers (and
/// tests) can tell validation apart from execution failures.
fn validate(spec: &ToolSpec, args: &JsonMap) -> Result<(), String> {
    for (name, param) in &spec.parameters {
        let value = match args.get(name) {
            Some(Value::Null) | None => {
                if param.required {
                    return Err(format!("missing required parameter '{name}'"));
                }
                continue;
            }
            Some(value) => value,
        };

        if !param.param_type.matches(value) {
            return Err(format!(
                "parameter '{name}' expects {}, got {}",
                param.param_type.as_str(),
                json_type_name(value)
            ));
        }

        if let Some(allowed) = &param.one_of {
            let matched = value
                .as_str()
                .map(|v| allowed.iter().any(|a| a == v))
                .unwrap_or(false);
            if !matched {
                return Err(format!(
                    "parameter '{name}' must be one of [{}]",
                    allowed.join(", ")
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(minimum) = param.minimum {
                if number < minimum {
                    return Err(format!(
                        "parameter '{name}' is out of range: {number} < {minimum}"
                    ));
                }
            }
            if let Some(maximum) = param.maximum {
                if number > maximum {
                    return Err(format!(
                        "parameter '{name}' is out of range: {number} > {maximum}"
                    ));
                }
            }
        }
    }

    for name in args.keys() {
        if !spec.parameters.contains_key(name) {
            return Err(format!("unexpected parameter '{name}'"));
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
