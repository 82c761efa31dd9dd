//! Error types for FluxPort

use thiserror::Error;

/// Result type alias for FluxPort operations
pub type Result<T> = std::result::Result<T, PortError>;

/// FluxPort error types
#[derive(Error, Debug)]
pub enum PortError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request could not be sent or its body could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from a read endpoint
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON document
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Error reported inside a query response
    #[error("Query error: {0}")]
    Query(String),

    /// A line-protocol line could not be parsed
    #[error("Invalid line at {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    /// A record is missing its timestamp or has no fields
    #[error("Data integrity error in {entity}: {reason}")]
    DataIntegrity { entity: String, reason: String },

    /// Target schema could not be understood
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A precondition for the run does not hold
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Write rejected by the target and not worth retrying
    #[error("Write rejected for {entity}: {reason}")]
    Rejected { entity: String, reason: String },

    /// Every retry attempt for a write failed
    #[error("Write to {entity} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        entity: String,
        attempts: u32,
        last_error: String,
    },
}

impl PortError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PortError::Http(_) => true,
            PortError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if error indicates bad source data
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            PortError::DataIntegrity { .. } | PortError::InvalidLine { .. }
        )
    }

    pub(crate) fn integrity(entity: &str, reason: impl Into<String>) -> Self {
        PortError::DataIntegrity {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }
}
