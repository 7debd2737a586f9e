//! Logging initialization.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogDestination;

/// Filter directive used when `RUST_LOG` is not set.
fn default_directive<'a>(destination: &LogDestination, level: &'a str) -> &'a str {
    match destination {
        LogDestination::Stderr => "warn",
        LogDestination::Stdout | LogDestination::File(_) => level,
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber for `destination`.
pub fn init(destination: &LogDestination, level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(destination, level)));

    let layer = match destination {
        LogDestination::Stdout => tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_filter(filter)
            .boxed(),
        LogDestination::File(path) => {
            let file = open_log_file(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_filter(filter)
                .boxed()
        }
        LogDestination::Stderr => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(())
}
