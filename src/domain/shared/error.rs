//! Domain errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
