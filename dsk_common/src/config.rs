//! Host configuration and TOML loading.
//!
//! Any `serde`-deserializable struct can be read from a TOML file through
//! [`ConfigLoader`]. [`HostConfig`] describes a host process: which devices
//! to create and how to wire their PVs together once they exist.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dsk_common::config::{ConfigLoader, HostConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = HostConfig::load(Path::new("host.toml"))?;
//!     config.validate()?;
//!     println!("{} devices", config.devices.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Failure to read, parse or validate a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The path does not exist.
    #[error("Config file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Config parse error: {0}")]
    ParseError(String),

    /// Parsed, but inconsistent.
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Log level for application and per-component logging.
///
/// Ordered from most to least verbose. Uses lowercase serde values for TOML
/// compatibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub const fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Whether an event at `level` passes a gate set to `self`.
    pub fn allows(&self, level: LogLevel) -> bool {
        level >= *self
    }

    /// Decode a level stored as `u8`; out-of-range codes saturate to `Error`.
    pub const fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            _ => Self::Error,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

/// Common configuration fields shared by every host.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "dsk-host-01"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default level for the process and every component.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name reported in logs and status snapshots.
    pub service_name: String,
}

impl SharedConfig {
    /// Rejects an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "shared.service_name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One device to create at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Factory name, e.g. `"multiplexer"`.
    pub device_type: String,
    /// Root node name; also the device handle.
    pub name: String,
    /// Free-form factory parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// A PV link: subscription (`from` input → `to` output) or
/// replication (`from` source input → `to` destination input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub to: String,
}

/// A command to run after wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Full name of the component that defines the command.
    pub component: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Complete configuration of a host process.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "dsk-host"
///
/// [[devices]]
/// device_type = "multiplexer"
/// name = "mux"
/// parameters = { inputs = "2", value_type = "int32" }
///
/// [[subscriptions]]
/// from = "src-Source.Channel_0"
/// to = "mux-Mux.DataIn_0"
///
/// [[commands]]
/// component = "mux-Mux"
/// command = "switchOn"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub subscriptions: Vec<LinkConfig>,
    #[serde(default)]
    pub replications: Vec<LinkConfig>,
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

/// Arity of the commands every kernel component defines.
const BUILTIN_COMMANDS: &[(&str, usize)] = &[
    ("switchOn", 0),
    ("switchOff", 0),
    ("start", 0),
    ("stop", 0),
    ("replicate", 1),
    ("decimation", 1),
    ("setLogLevel", 1),
];

impl HostConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the shared section is invalid
    /// - a device type or name is empty, or a device name repeats
    /// - a link endpoint is empty or a link points at itself
    /// - a built-in command is given the wrong number of arguments
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.device_type.is_empty() || device.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "device_type and name cannot be empty".to_string(),
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
        }

        for link in self.subscriptions.iter().chain(&self.replications) {
            if link.from.is_empty() || link.to.is_empty() {
                return Err(ConfigError::ValidationError(
                    "link endpoints cannot be empty".to_string(),
                ));
            }
            if link.from == link.to {
                return Err(ConfigError::ValidationError(format!(
                    "link '{}' points at itself",
                    link.from
                )));
            }
        }

        for cmd in &self.commands {
            if let Some((_, arity)) = BUILTIN_COMMANDS.iter().find(|(n, _)| *n == cmd.command)
                && cmd.args.len() != *arity
            {
                return Err(ConfigError::ValidationError(format!(
                    "command '{}' on '{}' takes {} arguments, {} given",
                    cmd.command,
                    cmd.component,
                    arity,
                    cmd.args.len()
                )));
            }
        }
        Ok(())
    }
}

/// TOML loading for any deserializable config struct.
///
/// A missing file gives `FileNotFound`; unreadable or malformed content gives
/// `ParseError`. Validation is left to the caller.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound,
            _ => ConfigError::ParseError(e.to_string()),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
