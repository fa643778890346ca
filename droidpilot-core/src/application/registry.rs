//! Static catalog mapping tool names to parameter schemas and handlers.
//! Registration happens once at startup; afterwards the registry is shared
//! as `Arc<ToolRegistry>` and has no mutation path, so the model's view of
//! the available tools cannot change mid-task.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use crate::application::device::{DeviceDriver, DriverError};
use crate::domain::{JsonMap, Payload};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    /// Enum constraint; the value must be one of these strings.
    pub one_of: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl ParamSpec {
    pub fn required(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: true,
            description: description.into(),
            one_of: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn optional(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(param_type, description)
        }
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.one_of = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }
}

/// Executable side of a [`ToolSpec`]. Exactly one device interaction per
/// invocation; retries are loop-level policy.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(
        &self,
        driver: &dyn DeviceDriver,
        args: &JsonMap,
    ) -> Result<Payload, DriverError>;
}

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParamSpec>,
    /// Natural timeout for this action class; overridable from config.
    pub timeout: Duration,
    handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        timeout: Duration,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            timeout,
            handler,
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// JSON schema in the function-calling shape shared by the supported
    /// providers.
    pub fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), json!(spec.param_type.as_str()));
            prop.insert("description".to_string(), json!(spec.description));
            if let Some(values) = &spec.one_of {
                prop.insert("enum".to_string(), json!(values));
            }
            if let Some(minimum) = spec.minimum {
                prop.insert("minimum".to_string(), json!(minimum));
            }
            if let Some(maximum) = spec.maximum {
                prop.insert("maximum".to_string(), json!(maximum));
            }
            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(name.clone());
            }
        }
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        })
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<ToolSpec>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateTool(spec.name));
        }
        self.tools.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ToolSpec>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<ToolSpec>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Compact catalog rendering for the model prompt.
    pub fn schema_manifest(&self) -> Value {
        Value::Array(self.tools.values().map(|spec| spec.schema()).collect())
    }
}
