//! Startup errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors. All of them are fatal and reported before the
/// listener opens.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid JSON or has the wrong shape.
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("logStdout and logFile are mutually exclusive")]
    ConflictingLogDestinations,

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("{field} must be at most {max}")]
    LimitTooLarge { field: &'static str, max: usize },

    #[error("protocol {index}: unknown kind {kind:?}")]
    UnknownKind { index: usize, kind: String },

    /// Options missing or of the wrong type.
    #[error("protocol {index} ({kind}): invalid options")]
    InvalidOptions {
        index: usize,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Options well-formed but not acceptable together.
    #[error("protocol {index} ({kind}): {message}")]
    Invalid {
        index: usize,
        kind: String,
        message: String,
    },

    /// A file named by the options could not be loaded.
    #[error("protocol {index} ({kind}): failed to load {}", path.display())]
    FileLoad {
        index: usize,
        kind: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to initialize backend dialer")]
    Dialer(#[source] serve2::Error),
}

impl ConfigError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read_failed",
            ConfigError::Parse { .. } => "config_parse_failed",
            ConfigError::ConflictingLogDestinations => "conflicting_log_destinations",
            ConfigError::ZeroLimit(_) => "zero_limit",
            ConfigError::LimitTooLarge { .. } => "limit_too_large",
            ConfigError::UnknownKind { .. } => "unknown_kind",
            ConfigError::InvalidOptions { .. } => "invalid_options",
            ConfigError::Invalid { .. } => "invalid_protocol",
            ConfigError::FileLoad { .. } => "file_load_failed",
            ConfigError::Dialer(_) => "dialer_init_failed",
        }
    }
}
