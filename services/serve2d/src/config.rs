//! Daemon configuration.
//!
//! Loaded once from a JSON file. Field names are camelCase; the capitalized
//! spellings (`Address`, `Protocols`, `Kind`, `Conf`, ...) are accepted too.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;

/// Default log filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default backend connect timeout in milliseconds.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

/// serve2d configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Listen address, `host:port`.
    #[serde(alias = "Address")]
    pub address: String,

    /// Bytes buffered for protocol detection.
    #[serde(default = "default_max_read", alias = "MaxRead")]
    pub max_read: usize,

    /// Log to stdout.
    #[serde(default, alias = "LogStdout")]
    pub log_stdout: bool,

    /// Log (JSON) to this file.
    #[serde(default, alias = "LogFile")]
    pub log_file: Option<PathBuf>,

    /// Log filter directive (trace, debug, info, warn, error). `RUST_LOG`
    /// takes precedence.
    #[serde(default = "default_log_level", alias = "LogLevel")]
    pub log_level: String,

    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections", alias = "MaxConnections")]
    pub max_connections: usize,

    /// Backend connect timeout in milliseconds.
    #[serde(default = "default_dial_timeout_ms", alias = "DialTimeoutMs")]
    pub dial_timeout_ms: u64,

    /// Protocols in detection order.
    #[serde(default, alias = "Protocols")]
    pub protocols: Vec<ProtocolSpec>,
}

/// One configured protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSpec {
    #[serde(alias = "Kind")]
    pub kind: String,

    /// Use as the fallback handler instead of a detector.
    #[serde(default, alias = "Default")]
    pub default: bool,

    /// Kind-specific options.
    #[serde(default, alias = "Conf")]
    pub conf: Value,
}

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    File(PathBuf),
    /// Neither destination configured: warnings and errors on stderr.
    Stderr,
}

fn default_max_read() -> usize {
    serve2::DEFAULT_MAX_READ
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_max_connections() -> usize {
    serve2::DEFAULT_MAX_CONNECTIONS
}

fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check settings that do not depend on any protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_stdout && self.log_file().is_some() {
            return Err(ConfigError::ConflictingLogDestinations);
        }
        if self.max_read == 0 {
            return Err(ConfigError::ZeroLimit("maxRead"));
        }
        if self.max_read > serve2::MAX_READ_LIMIT {
            return Err(ConfigError::LimitTooLarge {
                field: "maxRead",
                max: serve2::MAX_READ_LIMIT,
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroLimit("maxConnections"));
        }
        Ok(())
    }

    /// Configured log file, ignoring an empty path.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub fn log_destination(&self) -> LogDestination {
        if self.log_stdout {
            LogDestination::Stdout
        } else if let Some(path) = self.log_file() {
            LogDestination::File(path.to_path_buf())
        } else {
            LogDestination::Stderr
        }
    }

    /// Listen address with an empty host (`:8080`) bound on all interfaces.
    pub fn bind_address(&self) -> String {
        match self.address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.address.clone(),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}
