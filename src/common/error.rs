//! Error types for mpc_tracking

use thiserror::Error;

/// Main error type for the tracking controller
#[derive(Debug, Error)]
pub enum MpcError {
    /// Caller handed in malformed data (mismatched or too few waypoints, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Reference polynomial least-squares system was singular or ill-conditioned
    #[error("Fit error: {0}")]
    FitError(String),
    /// Rejected configuration, fatal at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Simulator frame could not be decoded or encoded
    #[error("Parse error: {0}")]
    ParseError(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Visualization error
    #[error("Visualization error: {0}")]
    VisualizationError(String),
}

impl From<serde_json::Error> for MpcError {
    fn from(e: serde_json::Error) -> Self {
        MpcError::ParseError(e.to_string())
    }
}

impl From<toml::de::Error> for MpcError {
    fn from(e: toml::de::Error) -> Self {
        MpcError::InvalidConfig(e.to_string())
    }
}

/// Result type alias for controller operations
pub type MpcResult<T> = Result<T, MpcError>;
