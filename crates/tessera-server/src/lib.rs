//! Tessera Server - headless host for a Tessera world.
//!
//! This crate wires the world store and chunk prefetcher together behind a
//! TOML configuration and a start/pregenerate/shutdown lifecycle.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod server;

pub use config::{ServerConfig, CONFIG_FILE};
pub use server::{Server, ServerError, ServerResult, ShutdownReport};
