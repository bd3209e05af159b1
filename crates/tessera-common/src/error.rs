//! Error types shared across Tessera crates.

use thiserror::Error;

/// Failure to parse a canonical `"x,y"` chunk key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCoordError {
    /// The key did not contain exactly one comma.
    #[error("Malformed chunk key '{0}': expected \"x,y\"")]
    Malformed(String),

    /// One of the components was not an integer.
    #[error("Invalid chunk key component '{component}' in '{key}'")]
    InvalidComponent {
        /// Full key being parsed
        key: String,
        /// Offending component
        component: String,
    },
}
