//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Display name is empty or whitespace only
    #[error("Invalid name: must not be empty")]
    EmptyName,

    /// Display name exceeds the length limit
    #[error("Invalid name: {len} characters (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// Display name contains whitespace or control characters
    #[error("Invalid name {name:?}: whitespace and control characters are not allowed")]
    InvalidCharacters { name: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
