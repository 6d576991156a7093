//! Error types for UKCLIM

use thiserror::Error;

/// Result type alias for UKCLIM operations
pub type Result<T> = std::result::Result<T, ClimError>;

/// Main error type for UKCLIM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClimError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
