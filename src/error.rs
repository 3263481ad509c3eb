//! Error types for the floodgate library.

use thiserror::Error;

/// Main error type for floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid limiter or policy configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from policy file loading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
