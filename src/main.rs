//! CLI entry point for hioki_daq
//!
//! # Usage
//!
//! Full run as configured (sampling loop or `[run.script]`):
//! ```bash
//! hioki_daq --config config/hioki.toml run
//! ```
//!
//! One script, overriding tier and budget:
//! ```bash
//! hioki_daq script demos/simple_sweep.rhai --mode trusted --timeout 120
//! ```
//!
//! Read back the instrument setup:
//! ```bash
//! hioki_daq snapshot
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hioki_daq::config::{ScriptSettings, Settings};
use hioki_daq::logging::{self, OutputFormat};
use hioki_daq::runner;
use hioki_daq::scripting::SandboxMode;
use hioki_daq::session::DeviceSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hioki_daq")]
#[command(about = "Hioki meter automation over TCP", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/hioki.toml")]
    config: PathBuf,

    /// Log line format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the meter, then sample or run the configured script
    Run,

    /// Configure the meter and run one Rhai script
    Script {
        /// Path to .rhai script file
        path: PathBuf,

        /// Capability tier
        #[arg(long, value_enum, default_value_t = SandboxMode::Restricted)]
        mode: SandboxMode,

        /// Wall-clock budget in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Print the meter's current settings
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    logging::init(&settings.application.log_level, cli.log_format)?;

    match cli.command {
        Commands::Run => {
            let summary = runner::run(&settings).await?;
            if let Some(file) = &summary.run_file {
                info!(
                    file = %file.display(),
                    samples = summary.samples,
                    timeouts = summary.timeouts,
                    "Run complete"
                );
            }
            if let Some(file) = &summary.results_file {
                info!(%file, "Script results saved");
            }
        }
        Commands::Script {
            path,
            mode,
            timeout,
        } => {
            let script = ScriptSettings {
                path,
                mode,
                timeout_secs: timeout,
                autosave: true,
            };
            run_script(&settings, &script).await?;
        }
        Commands::Snapshot => {
            for (command, reply) in runner::snapshot(&settings).await? {
                println!("{command}={reply}");
            }
        }
    }
    Ok(())
}

async fn run_script(settings: &Settings, script: &ScriptSettings) -> Result<()> {
    let session = DeviceSession::connect(&settings.host)
        .await
        .context("Failed to connect to instrument")?;
    let session = Arc::new(Mutex::new(session));

    let outcome = async {
        session.lock().await.apply_configuration(settings).await?;
        runner::run_script(
            Arc::clone(&session),
            script,
            &settings.application.output_dir,
        )
        .await
    }
    .await;

    if let Err(err) = session.lock().await.close().await {
        warn!(error = %err, "Error while closing connection");
    }

    let summary = outcome?;
    if let Some(value) = &summary.script_value {
        println!("Result: {value}");
    }
    if let Some(file) = &summary.results_file {
        println!("Results saved to {file}");
    }
    Ok(())
}
