//! Common error types for unmix

use thiserror::Error;

/// Common result type for unmix operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the unmix services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invariant violation: a result that must never occur was produced
    /// (e.g. a SUCCESS with zero stems). Distinct from an ordinary job
    /// failure so callers can flag it instead of passing it through.
    #[error("Defect: {0}")]
    Defect(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
