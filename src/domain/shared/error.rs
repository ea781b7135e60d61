//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Phone is not initialized")]
    NotInitialized,

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Call rejected: {0}")]
    CallRejected(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Signaling stack error: {0}")]
    Stack(String),
}
