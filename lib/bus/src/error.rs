//! Errors from bus publish operations.

use eventide_core::{Classify, ErrorClass};
use std::fmt;

/// Errors produced by a `Bus` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The broker connection could not be established or was lost.
    ConnectionFailed { message: String },
    /// The payload could not be serialized for publish.
    Serialization { message: String },
    /// The broker rejected or failed to acknowledge the publish.
    PublishFailed { message: String },
    /// The operation exceeded its deadline.
    Timeout,
    /// The circuit breaker for this bus is open.
    CircuitOpen,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "bus connection failed: {message}"),
            Self::Serialization { message } => write!(f, "failed to serialize message: {message}"),
            Self::PublishFailed { message } => write!(f, "publish failed: {message}"),
            Self::Timeout => write!(f, "publish timed out"),
            Self::CircuitOpen => write!(f, "bus circuit breaker open"),
        }
    }
}

impl std::error::Error for BusError {}

impl Classify for BusError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::ConnectionFailed { .. } | Self::PublishFailed { .. } => {
                ErrorClass::TransientTransport
            }
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
            BusError::ConnectionFailed { message: "x".into() }.classify(),
            ErrorClass::TransientTransport
        );
        assert_eq!(
            BusError::Serialization { message: "x".into() }.classify(),
            ErrorClass::Serialization
        );
        assert_eq!(BusError::Timeout.classify(), ErrorClass::Timeout);
        assert_eq!(BusError::CircuitOpen.classify(), ErrorClass::CircuitOpen);
    }
}
