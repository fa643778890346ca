use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_WALL_TIME_SECS, DEFAULT_MODEL, DEFAULT_MODEL_TIMEOUT_SECS,
    DEFAULT_OLLAMA_URL, DEFAULT_RETRY_BUDGET, DEFAULT_SCREENSHOT_DIR, DEFAULT_TRANSCRIPT_DIR,
};

pub const CONFIG_PATH: &str = "config/droidpilot.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Per-run budgets consumed by the session and the agent loop. The core
/// never reads configuration sources itself; resolved values arrive here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_iterations: u32,
    pub retry_budget: u32,
    pub model_timeout: Duration,
    pub max_wall_time: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            max_wall_time: Duration::from_secs(DEFAULT_MAX_WALL_TIME_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// "ollama" or "gemini".
    pub provider_type: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key, for providers
    /// that need one.
    pub api_key_env: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "ollama".to_string(),
            endpoint: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub screenshot_dir: PathBuf,
    pub transcript_dir: PathBuf,
    pub limits: Limits,
    /// Per-tool timeout overrides in seconds, applied onto the built-in
    /// catalog at startup.
    pub tool_timeouts: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    provider: RawProvider,
    screenshot_dir: Option<String>,
    transcript_dir: Option<String>,
    #[serde(default)]
    limits: RawLimits,
    #[serde(default)]
    tool_timeouts: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProvider {
    #[serde(rename = "type")]
    provider_type: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawLimits {
    max_iterations: Option<u32>,
    retry_budget: Option<u32>,
    model_timeout_secs: Option<u64>,
    max_wall_time_secs: Option<u64>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            screenshot_dir: PathBuf::from(DEFAULT_SCREENSHOT_DIR),
            transcript_dir: PathBuf::from(DEFAULT_TRANSCRIPT_DIR),
            limits: Limits::default(),
            tool_timeouts: BTreeMap::new(),
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let defaults = ProviderConfig::default();
    let provider_type = parsed
        .provider
        .provider_type
        .unwrap_or(defaults.provider_type);
    let endpoint = parsed.provider.endpoint.unwrap_or_else(|| {
        if provider_type == "gemini" {
            crate::constants::DEFAULT_GEMINI_ENDPOINT.to_string()
        } else {
            defaults.endpoint.clone()
        }
    });

    Ok(AppConfig {
        provider: ProviderConfig {
            provider_type,
            endpoint,
            model: parsed.provider.model.unwrap_or(defaults.model),
            api_key_env: parsed.provider.api_key_env,
        },
        screenshot_dir: PathBuf::from(
            parsed
                .screenshot_dir
                .unwrap_or_else(|| DEFAULT_SCREENSHOT_DIR.to_string()),
        ),
        transcript_dir: PathBuf::from(
            parsed
                .transcript_dir
                .unwrap_or_else(|| DEFAULT_TRANSCRIPT_DIR.to_string()),
        ),
        limits: Limits {
            max_iterations: parsed
                .limits
                .max_iterations
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
            retry_budget: parsed.limits.retry_budget.unwrap_or(DEFAULT_RETRY_BUDGET),
            model_timeout: Duration::from_secs(
                parsed
                    .limits
                    .model_timeout_secs
                    .unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS),
            ),
            max_wall_time: Duration::from_secs(
                parsed
                    .limits
                    .max_wall_time_secs
                    .unwrap_or(DEFAULT_MAX_WALL_TIME_SECS),
            ),
        },
        tool_timeouts: parsed.tool_timeouts,
    })
}
