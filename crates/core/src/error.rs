//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants). Infrastructure concerns belong elsewhere.
///
/// Folding is pure, so a `DomainError` raised by a reducer is never retried:
/// replaying the same events reproduces the same failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A command failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (e.g. an event applied out of order).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An entity key could not be decoded.
    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

/// Fail with an invariant violation unless `condition` holds.
///
/// Reducers use this to reject structurally impossible event sequences.
pub fn ensure(condition: bool, msg: impl FnOnce() -> String) -> DomainResult<()> {
    if condition {
        Ok(())
    } else {
        Err(DomainError::InvariantViolation(msg()))
    }
}
