//! Common error types for sentiq

use thiserror::Error;

/// Common result type for sentiq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the sentiq crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport rejected an operation (closed broker, unknown group, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
