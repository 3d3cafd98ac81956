//! Error types for groupcast

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// groupcast core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Peer address could not be parsed
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}
