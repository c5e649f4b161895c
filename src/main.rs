//! CLI entry point for smart-power
//!
//! ```bash
//! # Read the meter until Ctrl+C
//! smart-power run --config config/smart-power.toml
//!
//! # Show the effective configuration (password masked)
//! smart-power check-config --config config/smart-power.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use power_acquisition::{EngineStatus, MeterEngine};
use power_core::serial::open_serial_async;
use smart_power::config::{AppConfig, DEFAULT_CONFIG_PATH};
use smart_power::listeners::{EnergyCounter, LoggingListener};
use smart_power::telemetry;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "smart-power")]
#[command(about = "Wi-SUN B-route smart-meter reader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Associate with the meter and poll it until interrupted
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Load and validate a configuration file, then print it
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

async fn run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    telemetry::init(config.tracing_config()?)?;

    let power_source = config.power_source()?;
    info!(
        device = %config.device.path,
        baud_rate = config.device.baud_rate,
        rated_current_amps = power_source.rated_current_amps(),
        wire_count = power_source.wire_count(),
        "Opening Wi-SUN module"
    );
    let port = open_serial_async(&config.device.path, config.device.baud_rate, "Wi-SUN module")
        .await?;

    let engine = MeterEngine::new(Box::new(port), config.engine_settings());
    let energy = EnergyCounter::new();
    engine.subscribe_listener(LoggingListener::new(power_source));
    engine.subscribe_listener(energy.clone());
    engine.start()?;

    let mut status = engine.status_receiver();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted, stopping engine");
        }
        stopped = status.wait_for(|s| *s == EngineStatus::Stopped) => {
            if stopped.is_err() {
                warn!("Engine status channel closed");
            }
        }
    }

    engine.request_stop();
    let outcome = engine.await_stopped().await;

    let snapshot = engine.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("Energy used while running: {:.1} kWh", energy.total_kwh());
    if let Some(version) = engine.firmware_version() {
        println!("Modem firmware: {version}");
    }

    if let Err(e) = &outcome {
        error!(error = %e, "Engine stopped with an error");
    }
    outcome.context("Meter acquisition failed")
}
