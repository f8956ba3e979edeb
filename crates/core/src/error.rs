//! Error model shared across crates.

use thiserror::Error;

/// Deterministic, input-driven failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Failure reported by a persistence adapter (in-memory, Postgres, Redis).
///
/// Callers decide whether a store failure degrades, is swallowed, or maps to a 500.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the operation failed at the driver level.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be decoded into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
