//! Error types for connection handling.

use std::io;

use thiserror::Error;

/// Errors raised while a handler owns a connection.
///
/// None of these are fatal to the process: the dispatcher logs them and
/// closes the affected connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the client or backend side.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Backend connection could not be established.
    #[error("dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Backend connection did not complete within the connect timeout.
    #[error("dial {target} timed out")]
    DialTimeout { target: String },

    /// TLS handshake or configuration failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server name could not be used for an outbound TLS handshake.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// HTTP protocol error while serving a connection.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// TLS-in-TLS nesting went past the re-detection limit.
    #[error("re-detection depth {0} exceeded")]
    RedetectDepth(usize),
}

impl Error {
    /// Short reason code used in log fields.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Dial { .. } => "dial_failed",
            Error::DialTimeout { .. } => "dial_timeout",
            Error::Tls(_) => "tls_error",
            Error::InvalidServerName(_) => "invalid_server_name",
            Error::Http(_) => "http_error",
            Error::RedetectDepth(_) => "redetect_depth",
        }
    }
}

/// Result alias for connection handling.
pub type Result<T> = std::result::Result<T, Error>;
