//! Errors from D/C/K store operations.

use eventide_core::{Classify, ErrorClass};
use std::fmt;

/// Errors produced by any store implementation (D, C, or K).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    Unreachable { message: String },
    /// A conditional write (CAS, status-patch) lost the race.
    ConditionFailed { message: String },
    /// The requested row does not exist.
    NotFound { id: String },
    /// A uniqueness constraint was violated (e.g. duplicate definition name).
    AlreadyExists { id: String },
    /// The stored or requested payload could not be (de)serialized.
    Serialization { message: String },
    /// The operation exceeded its deadline.
    Timeout,
    /// The circuit breaker for this store is open.
    CircuitOpen,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { message } => write!(f, "store unreachable: {message}"),
            Self::ConditionFailed { message } => write!(f, "conditional write failed: {message}"),
            Self::NotFound { id } => write!(f, "not found: {id}"),
            Self::AlreadyExists { id } => write!(f, "already exists: {id}"),
            Self::Serialization { message } => write!(f, "serialization failed: {message}"),
            Self::Timeout => write!(f, "store operation timed out"),
            Self::CircuitOpen => write!(f, "store circuit breaker open"),
        }
    }
}

impl std::error::Error for StoreError {}

impl Classify for StoreError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Unreachable { .. } => ErrorClass::TransientTransport,
            Self::ConditionFailed { .. } => ErrorClass::TransientContention,
            Self::NotFound { .. } | Self::AlreadyExists { .. } => ErrorClass::Validation,
            Self::Serialization { .. } => ErrorClass::Serialization,
            Self::Timeout => ErrorClass::Timeout,
            Self::CircuitOpen => ErrorClass::CircuitOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(
            StoreError::Unreachable { message: "x".into() }.classify(),
            ErrorClass::TransientTransport
        );
        assert_eq!(
            StoreError::ConditionFailed { message: "x".into() }.classify(),
            ErrorClass::TransientContention
        );
        assert_eq!(
            StoreError::Serialization { message: "x".into() }.classify(),
            ErrorClass::Serialization
        );
        assert_eq!(StoreError::Timeout.classify(), ErrorClass::Timeout);
        assert_eq!(StoreError::CircuitOpen.classify(), ErrorClass::CircuitOpen);
    }
}
