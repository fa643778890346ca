//! Crate-wide defaults. Anything user-tunable here can be overridden from
//! the configuration file; see [`crate::config`].

pub const DEFAULT_MODEL: &str = "gemma3:12b";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_API_PATH: &str = "v1beta/models";

pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";
pub const DEFAULT_TRANSCRIPT_DIR: &str = "sessions";

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_RETRY_BUDGET: u32 = 2;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_WALL_TIME_SECS: u64 = 300;

/// How many of the most recent transcript entries are serialized into a
/// model request. Older entries are dropped from the window, never from the
/// transcript itself.
pub const TRANSCRIPT_WINDOW: usize = 40;

/// How many trailing transcript entries a failed task report carries for
/// diagnosis.
pub const FAILURE_TAIL_LEN: usize = 10;
