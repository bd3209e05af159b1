//! # Tessera Common
//!
//! Common types shared by the Tessera world crates.
//!
//! This crate provides:
//! - Coordinate types (chunk, tile, pixel, view rectangle)
//! - Identifier types (objects, players)
//! - Version information for on-disk schemas
//! - Coordinate parse errors

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;
