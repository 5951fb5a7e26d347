//! Error handling foundation for the eventide platform.
//!
//! This module provides the error classification taxonomy shared by every
//! retrying component. Each crate defines its own domain-specific error
//! types in their own error modules and implements `Classify` so the
//! workers can dispatch on classification rather than error type.

/// The retry-policy classification of an error, per the error handling
/// taxonomy: every store call, bus publish, and scheduling API error falls
/// into exactly one of these classes, and the class (not the concrete error
/// type) determines what a worker does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Store or bus unreachable. Retried with exponential backoff.
    TransientTransport,
    /// CAS miss or lock held by another replica. Not retried this tick; the
    /// next tick naturally retries.
    TransientContention,
    /// Payload malformed. Not retried; surfaced to the caller or recorded as
    /// an `error` outcome on the event.
    Serialization,
    /// Bad input at the scheduling API. Not retried; surfaced to the caller.
    Validation,
    /// A call exceeded its deadline. Retried with limited linear backoff.
    Timeout,
    /// The circuit breaker for this dependency is open. Treated the same as
    /// `TransientTransport` by callers.
    CircuitOpen,
    /// Unrecoverable shape error. Not retried; the event is marked `error`.
    Fatal,
}

impl ErrorClass {
    /// Whether a worker should retry on this tick's next pass rather than
    /// waiting for an external backoff clock.
    #[must_use]
    pub const fn retries_next_tick(self) -> bool {
        matches!(self, Self::TransientContention)
    }

    /// Whether this classification carries a backoff delay before retrying.
    #[must_use]
    pub const fn is_backed_off(self) -> bool {
        matches!(
            self,
            Self::TransientTransport | Self::Timeout | Self::CircuitOpen
        )
    }

    /// Whether this classification is terminal: no retry is ever attempted
    /// and the affected unit of work is marked `error`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Serialization | Self::Validation | Self::Fatal)
    }
}

/// Implemented by every error type that can be produced inside the engine so
/// workers can dispatch on classification uniformly instead of matching on
/// concrete error variants at each call site.
pub trait Classify {
    /// Returns this error's retry classification.
    fn classify(&self) -> ErrorClass;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_contention_retries_next_tick_only() {
        assert!(ErrorClass::TransientContention.retries_next_tick());
        assert!(!ErrorClass::TransientContention.is_backed_off());
    }

    #[test]
    fn transient_transport_is_backed_off() {
        assert!(ErrorClass::TransientTransport.is_backed_off());
        assert!(!ErrorClass::TransientTransport.is_terminal());
    }

    #[test]
    fn validation_and_serialization_are_terminal() {
        assert!(ErrorClass::Validation.is_terminal());
        assert!(ErrorClass::Serialization.is_terminal());
        assert!(ErrorClass::Fatal.is_terminal());
    }

    #[test]
    fn circuit_open_is_backed_off_not_terminal() {
        assert!(ErrorClass::CircuitOpen.is_backed_off());
        assert!(!ErrorClass::CircuitOpen.is_terminal());
    }
}
