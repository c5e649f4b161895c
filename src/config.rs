//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/smart-power.toml` by default)
//! 2. environment variables prefixed with `SMART_POWER_`, `__` separating
//!    nested keys (`SMART_POWER_DEVICE__PATH=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use smart_power::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Meter modem on {}", config.device.path);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::telemetry::{self, OutputFormat, TracingConfig};
use anyhow::{bail, Context};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use power_acquisition::EngineSettings;
use power_core::serial::DEFAULT_BAUD_RATE;
use power_core::PowerSource;
use power_driver_skstack::command::MAX_SCAN_DURATION;
use power_driver_skstack::{Credentials, ScanPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/smart-power.toml";
pub const ENV_PREFIX: &str = "SMART_POWER_";

const REDACTED: &str = "********";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Modem and B-route credentials
    pub device: DeviceConfig,
    /// Active scan retry policy
    #[serde(default)]
    pub scan: ScanConfig,
    /// Association and poll timeouts
    #[serde(default)]
    pub timing: TimingConfig,
    /// Installation the meter sits on
    #[serde(default)]
    pub power_source: PowerSourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial device of the Wi-SUN module (e.g. "/dev/ttyUSB0")
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// B-route password issued by the utility
    pub password: String,
    /// B-route authentication ID issued by the utility
    pub route_b_id: String,
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("password", &REDACTED)
            .field("route_b_id", &self.route_b_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_channel_mask")]
    pub channel_mask: u32,
    #[serde(default = "default_initial_duration")]
    pub initial_duration: u8,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_duration_step")]
    pub duration_step: u8,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            channel_mask: default_channel_mask(),
            initial_duration: default_initial_duration(),
            max_attempts: default_max_attempts(),
            duration_step: default_duration_step(),
        }
    }
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Quiet period that flushes stale modem output after opening the port
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Bound on each association reply (0 = wait indefinitely)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Bound on each asynchronous association event such as scan results (0 = wait indefinitely)
    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,
    /// Bound on each poll response
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            event_timeout_ms: default_event_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

/// Unvalidated power source description; see [`AppConfig::power_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSourceConfig {
    #[serde(default = "default_rated_current")]
    pub rated_current_amps: u32,
    #[serde(default = "default_wire_count")]
    pub wire_count: u32,
}

impl Default for PowerSourceConfig {
    fn default() -> Self {
        Self {
            rated_current_amps: default_rated_current(),
            wire_count: default_wire_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_channel_mask() -> u32 {
    0xFFFF_FFFF
}

fn default_initial_duration() -> u8 {
    4
}

fn default_max_attempts() -> u32 {
    4
}

fn default_duration_step() -> u8 {
    1
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_event_timeout_ms() -> u64 {
    600_000
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn default_rated_current() -> u32 {
    30
}

fn default_wire_count() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from the default path and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, with environment
    /// overrides on top.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> anyhow::Result<()> {
        telemetry::parse_log_level(&self.logging.level)?;

        if self.device.path.trim().is_empty() {
            bail!("device.path must not be empty");
        }
        if self.device.baud_rate == 0 {
            bail!("device.baud_rate must be positive");
        }
        if self.device.password.is_empty() {
            bail!("device.password must not be empty");
        }
        if self.device.route_b_id.is_empty() {
            bail!("device.route_b_id must not be empty");
        }

        if self.scan.max_attempts == 0 {
            bail!("scan.max_attempts must be at least 1");
        }
        if self.scan.initial_duration > MAX_SCAN_DURATION {
            bail!(
                "Invalid scan.initial_duration {}. Must be 0-{MAX_SCAN_DURATION}",
                self.scan.initial_duration
            );
        }
        if self.scan.duration_step > MAX_SCAN_DURATION {
            bail!(
                "Invalid scan.duration_step {}. Must be 0-{MAX_SCAN_DURATION}",
                self.scan.duration_step
            );
        }

        if self.timing.response_timeout_ms == 0 {
            bail!("timing.response_timeout_ms must be positive");
        }

        self.power_source()?;
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.device.password, &self.device.route_b_id)
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy {
            channel_mask: self.scan.channel_mask,
            initial_duration: self.scan.initial_duration,
            duration_step: self.scan.duration_step,
            max_attempts: self.scan.max_attempts,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(self.credentials());
        settings.scan = self.scan_policy();
        settings.settle = Duration::from_millis(self.timing.settle_ms);
        settings.command_timeout = optional_millis(self.timing.command_timeout_ms);
        settings.event_timeout = optional_millis(self.timing.event_timeout_ms);
        settings.response_timeout = Duration::from_millis(self.timing.response_timeout_ms);
        settings
    }

    /// Validated power source description.
    pub fn power_source(&self) -> anyhow::Result<PowerSource> {
        PowerSource::new(
            self.power_source.rated_current_amps,
            self.power_source.wire_count,
        )
        .context("Invalid power_source")
    }

    pub fn tracing_config(&self) -> anyhow::Result<TracingConfig> {
        let level = telemetry::parse_log_level(&self.logging.level)?;
        Ok(TracingConfig::new(level).with_format(self.logging.format))
    }

    /// Copy safe to print: the B-route password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.device.password = REDACTED.to_string();
        copy
    }
}
