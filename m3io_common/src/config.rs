//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the driver binary and embedding applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use m3io_common::config::{ConfigLoader, ConfigError, DriverConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DriverConfig::load(Path::new("m3io.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_TIMEOUT_S, DRIVER_SERVICE_NAME, MAX_SLOTS, MAX_UNITS};
use crate::protocol::{AccessType, DeviceType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "m3io-cpu1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: DRIVER_SERVICE_NAME.to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How completions are handed back to request owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Owner callback runs on the command worker thread.
    Inline,
    /// Owner callback runs on a dedicated low-priority callback thread.
    #[default]
    Callback,
}

fn default_backend() -> String {
    "simulation".to_string()
}

fn default_timeout_s() -> u16 {
    DEFAULT_TIMEOUT_S
}

fn default_src_slot() -> u8 {
    1
}

fn default_max_unit() -> u8 {
    MAX_UNITS
}

fn default_max_slot() -> u8 {
    MAX_SLOTS
}

fn default_count() -> u16 {
    1
}

fn default_period_ms() -> u64 {
    1000
}

/// `[command]` section: the serialized command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Log every outgoing command frame at info level.
    #[serde(default)]
    pub trace_requests: bool,

    /// Completion delivery mode.
    #[serde(default)]
    pub resume: ResumeMode,

    /// Transport timeout stamped on commands built from this config.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u16,

    /// Slot of the CPU issuing commands.
    #[serde(default = "default_src_slot")]
    pub src_slot: u8,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            trace_requests: false,
            resume: ResumeMode::default(),
            timeout_s: default_timeout_s(),
            src_slot: default_src_slot(),
        }
    }
}

/// `[interrupts]` section: address bounds of the registration table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterruptConfig {
    /// Number of units; valid units are `0..max_unit`.
    #[serde(default = "default_max_unit")]
    pub max_unit: u8,

    /// Number of slots; valid slots are `1..=max_slot`.
    #[serde(default = "default_max_slot")]
    pub max_slot: u8,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            max_unit: default_max_unit(),
            max_slot: default_max_slot(),
        }
    }
}

impl InterruptConfig {
    /// True when (unit, slot) lies inside the configured bounds.
    pub fn contains(&self, unit: u8, slot: u8) -> bool {
        unit < self.max_unit && slot >= 1 && slot <= self.max_slot
    }
}

/// `[simulation]` section: behaviour of the simulated backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Artificial latency of every command round trip.
    #[serde(default)]
    pub latency_us: u64,

    /// Period of simulated interrupts on enabled channels (0 = none).
    #[serde(default)]
    pub event_period_ms: u64,
}

/// `[[poll]]` entry: a client reading a device periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    /// Client name used in logs.
    pub name: String,
    /// Target CPU slot.
    pub dest_slot: u8,
    /// Device kind.
    pub device: DeviceType,
    /// Element width.
    #[serde(default)]
    pub access: AccessType,
    /// First device number.
    pub top: u32,
    /// Element count.
    #[serde(default = "default_count")]
    pub count: u16,
    /// Poll period.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

/// `[[watch]]` entry: a client woken by interrupts on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Client name used in logs.
    pub name: String,
    /// Unit number.
    pub unit: u8,
    /// Slot number.
    pub slot: u8,
    /// Channel number.
    pub channel: u16,
}

/// Driver configuration loaded from `m3io.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Backend name (e.g., "simulation", "simulation-msgq").
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Command channel settings.
    #[serde(default)]
    pub command: CommandConfig,

    /// Interrupt table bounds.
    #[serde(default)]
    pub interrupts: InterruptConfig,

    /// Simulation backend settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Polling clients.
    #[serde(default)]
    pub poll: Vec<PollConfig>,

    /// Interrupt watching clients.
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            backend: default_backend(),
            command: CommandConfig::default(),
            interrupts: InterruptConfig::default(),
            simulation: SimulationConfig::default(),
            poll: Vec::new(),
            watch: Vec::new(),
        }
    }
}

impl DriverConfig {
    /// Validate the driver configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` is valid
    /// 2. `backend` is not empty
    /// 3. `command.timeout_s` > 0
    /// 4. `interrupts.max_unit` in 1..=MAX_UNITS, `max_slot` in 1..=MAX_SLOTS
    /// 5. Poll entries: period > 0, count > 0, relay devices use bit access
    /// 6. Watch entries lie inside the interrupt bounds
    /// 7. Client names unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.backend.is_empty() {
            return Err(ConfigError::ValidationError(
                "backend cannot be empty".to_string(),
            ));
        }

        if self.command.timeout_s == 0 {
            return Err(ConfigError::ValidationError(
                "command.timeout_s must be greater than 0".to_string(),
            ));
        }

        let irq = &self.interrupts;
        if irq.max_unit == 0 || irq.max_unit > MAX_UNITS {
            return Err(ConfigError::ValidationError(format!(
                "interrupts.max_unit {} out of range 1..={}",
                irq.max_unit, MAX_UNITS
            )));
        }
        if irq.max_slot == 0 || irq.max_slot > MAX_SLOTS {
            return Err(ConfigError::ValidationError(format!(
                "interrupts.max_slot {} out of range 1..={}",
                irq.max_slot, MAX_SLOTS
            )));
        }

        let mut names = HashSet::new();
        for poll in &self.poll {
            if poll.period_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "poll '{}': period_ms must be greater than 0",
                    poll.name
                )));
            }
            if poll.count == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "poll '{}': count must be greater than 0",
                    poll.name
                )));
            }
            if poll.device.is_relay() && poll.access != AccessType::Bit {
                return Err(ConfigError::ValidationError(format!(
                    "poll '{}': relay devices require access = \"bit\"",
                    poll.name
                )));
            }
            if !names.insert(poll.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate client name: {}",
                    poll.name
                )));
            }
        }

        for watch in &self.watch {
            if !irq.contains(watch.unit, watch.slot) {
                return Err(ConfigError::ValidationError(format!(
                    "watch '{}': U{} S{} outside interrupt bounds",
                    watch.name, watch.unit, watch.slot
                )));
            }
            if !names.insert(watch.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate client name: {}",
                    watch.name
                )));
            }
        }

        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
