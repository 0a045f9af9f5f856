//! Common error types for control plane components.

use thiserror::Error;

/// Errors surfaced to callers of the control plane
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Unknown cluster or workflow run
    #[error("Not found: {0}")]
    NotFound(String),

    /// Presented access key does not match, or the cluster may not send yet
    #[error("Access key mismatch: {0}")]
    AuthMismatch(String),

    /// Store failure, message kept verbatim
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Registration token could not be issued or validated
    #[error("Identity error: {0}")]
    IdentityIssue(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AuthMismatch(_) => 401,
            Self::Persistence(_) => 503,
            Self::IdentityIssue(_) => 500,
            Self::InvalidInput(_) => 400,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Timeout(_))
    }
}

/// Result alias used across the control plane
pub type Result<T> = std::result::Result<T, ControlPlaneError>;
