//! # Tessera Server
//!
//! Headless host for a Tessera world.
//!
//! Loads `tessera.toml` (or the path given as the first argument), activates
//! the default world, pregenerates the area around the spawn point and saves
//! it back before exiting.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tessera_server::{Server, ServerConfig, CONFIG_FILE};

/// Main entry point.
fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let config = ServerConfig::load_from(&config_path);

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("tessera=info".parse()?);
    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("Tessera server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());

    let server = Server::start(config).context("failed to start world server")?;
    server
        .pregenerate_spawn()
        .context("failed to pregenerate spawn area")?;
    let report = server.shutdown().context("failed to shut down cleanly")?;

    info!(
        "Tessera server stopped ({} chunk(s) saved)",
        report.chunks_saved
    );
    Ok(())
}
