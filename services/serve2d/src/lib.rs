//! serve2d: serve many protocols on one port.
//!
//! Reads a JSON configuration naming the protocols to detect, builds a
//! handler for each, and dispatches every accepted connection to the
//! protocol it speaks.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use serve2::{Listener, ListenerConfig};

pub mod config;
pub mod error;
pub mod factory;
pub mod logging;

pub use config::{Config, LogDestination, ProtocolSpec};
pub use error::ConfigError;
pub use factory::{build_server, HandlerFactory};

/// Build every handler and bind the listening socket.
///
/// Nothing is bound if any protocol fails to build.
pub async fn bind(config: &Config) -> Result<Arc<Listener>> {
    let server = build_server(config)?;

    let listener_config =
        ListenerConfig::new(config.bind_address()).with_max_connections(config.max_connections);
    let listener = Listener::bind(listener_config, Arc::new(server))
        .await
        .with_context(|| format!("failed to listen on {}", config.address))?;

    Ok(Arc::new(listener))
}

/// Load the configuration at `config_path` and serve until failure.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;

    logging::init(&config.log_destination(), &config.log_level)?;

    info!(
        address = %config.address,
        max_read = config.max_read,
        max_connections = config.max_connections,
        protocol_count = config.protocols.len(),
        "Configuration loaded"
    );

    let listener = bind(&config).await?;
    listener.run().await.context("listener failed")
}
