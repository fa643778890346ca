use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use droidpilot_core::adb::{self, AdbDriver};
use droidpilot_core::agent::AgentLoop;
use droidpilot_core::catalog;
use droidpilot_core::client::ModelClient;
use droidpilot_core::config::AppConfig;
use droidpilot_core::domain::{TranscriptEntry, TranscriptEvent};
use droidpilot_core::model::provider_from_config;
use droidpilot_core::session::{DeviceGate, SessionContext};
use droidpilot_core::store::TranscriptStore;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "droidpilot",
    version,
    about = "Drive an Android device with natural-language instructions"
)]
struct Cli {
    /// Configuration file (defaults to config/droidpilot.toml when present)
    #[arg(long)]
    config: Option<String>,
    /// Path to the adb binary
    #[arg(long, default_value = "adb")]
    adb: String,
    /// Device serial; omit to use the default adb device
    #[arg(long)]
    serial: Option<String>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run one task against the device
    Run {
        /// Read the instruction from a file instead of the arguments
        #[arg(long)]
        prompt_file: Option<String>,
        /// Override the configured iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Skip writing the session record
        #[arg(long)]
        no_save: bool,
        /// The instruction, as free text
        prompt: Vec<String>,
    },
    /// List the built-in tool catalog
    Tools,
    /// List connected devices and emulators
    Devices,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    debug!(?cli.serial, config = ?cli.config, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(expand_path);
    let config = AppConfig::load(config_path.as_deref())?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    }

    match cli.command {
        CliCommand::Tools => {
            let registry = catalog::builtin(&config.screenshot_dir, &config.tool_timeouts)?;
            println!("{}", serde_json::to_string_pretty(&registry.schema_manifest())?);
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Devices => {
            let devices = adb::list_devices(&cli.adb).await?;
            println!("{}", serde_json::to_string_pretty(&json!({ "devices": devices }))?);
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Run {
            prompt_file,
            max_iterations,
            no_save,
            prompt,
        } => {
            let instruction = load_prompt(&prompt, prompt_file.as_deref())?;
            let mut limits = config.limits.clone();
            if let Some(budget) = max_iterations {
                limits.max_iterations = budget;
            }

            let registry = Arc::new(catalog::builtin(
                &config.screenshot_dir,
                &config.tool_timeouts,
            )?);
            info!(tools = registry.len(), model = %config.provider.model, "Catalog ready");

            let provider = provider_from_config(&config.provider)?;
            let client =
                ModelClient::new(provider, config.provider.model.clone(), limits.model_timeout);
            let agent = AgentLoop::new(registry, client);

            let driver = Arc::new(AdbDriver::new(cli.adb.clone(), cli.serial.clone()));
            let gate = DeviceGate::new();
            let mut session = SessionContext::open(driver, &gate, limits)?;

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TranscriptEntry>();
            session.set_event_sink(tx);
            let printer = tokio::spawn(async move {
                while let Some(entry) = rx.recv().await {
                    println!("{}", render_entry(&entry));
                }
            });

            let report = agent.run(instruction, &mut session).await;
            let session_id = session.id().to_string();
            let transcript = session.close();
            let _ = printer.await;

            if !no_save {
                let store = TranscriptStore::new(&config.transcript_dir);
                match store.save(&session_id, &report, &transcript) {
                    Ok(path) => info!(path = %path.display(), "Session record saved"),
                    Err(err) => warn!(%err, "Could not save the session record"),
                }
            }

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.is_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn load_prompt(args: &[String], prompt_file: Option<&str>) -> Result<String, Box<dyn Error>> {
    if let Some(path) = prompt_file {
        let path = expand_path(path);
        info!(path = %path.display(), "Loading instruction from file");
        let content = fs::read_to_string(&path)?;
        return Ok(content.trim().to_string());
    }
    if !args.is_empty() {
        return Ok(args.join(" ").trim().to_string());
    }
    warn!("Instruction not provided via arguments or file");
    Err("instruction required via arguments or --prompt-file".into())
}

/// Human-readable one-liner per progress event. The core emits structured
/// entries; formatting for the terminal happens only here.
fn render_entry(entry: &TranscriptEntry) -> String {
    match &entry.event {
        TranscriptEvent::UserInstruction { text } => format!("[{:>3}] user  > {text}", entry.seq),
        TranscriptEvent::ModelUtterance { text } => format!("[{:>3}] model > {text}", entry.seq),
        TranscriptEvent::ToolCall(call) => format!(
            "[{:>3}] call  > {} {}",
            entry.seq,
            call.tool,
            serde_json::Value::Object(call.arguments.clone())
        ),
        TranscriptEvent::ToolResult(result) => {
            if result.is_ok() {
                format!("[{:>3}] ok    > {}", entry.seq, result.tool)
            } else {
                format!(
                    "[{:>3}] error > {}: {}",
                    entry.seq,
                    result.tool,
                    result.error_detail.as_deref().unwrap_or("unknown failure")
                )
            }
        }
    }
}
