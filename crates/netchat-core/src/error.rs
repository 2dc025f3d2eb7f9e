//! Domain-specific error types following the panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Username is empty or whitespace-only
    #[error("name must not be empty")]
    EmptyUsername,

    /// Username exceeds the maximum length
    #[error("name is too long (max {max} characters)")]
    UsernameTooLong { max: usize },

    /// Username contains control characters
    #[error("name contains unsupported characters")]
    InvalidUsername,
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
