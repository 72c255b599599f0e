// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid build status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
