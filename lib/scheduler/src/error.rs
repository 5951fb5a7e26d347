//! Errors from the scheduling API and the background workers.

use eventide_core::{Classify, ErrorClass};
use std::fmt;

/// Errors returned by the Scheduling API (§4.1). These are the only errors
/// surfaced directly to callers; everything else is absorbed into internal
/// retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// A required field was missing or `scheduled_at` was too far in the past.
    InvalidArgument { message: String },
    /// A cron definition name collided with an existing one.
    Duplicate { name: String },
    /// The cron expression did not parse.
    InvalidCron { message: String },
    /// The timezone name did not resolve.
    UnknownTimezone { timezone: String },
    /// The event could not be cancelled because it is no longer pending.
    Conflict { message: String },
    /// The underlying store failed.
    Store(eventide_store::StoreError),
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { message } => write!(f, "invalid argument: {message}"),
            Self::Duplicate { name } => write!(f, "duplicate definition name: {name}"),
            Self::InvalidCron { message } => write!(f, "invalid cron expression: {message}"),
            Self::UnknownTimezone { timezone } => write!(f, "unknown timezone: {timezone}"),
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for SchedulingError {}

impl From<eventide_store::StoreError> for SchedulingError {
    fn from(value: eventide_store::StoreError) -> Self {
        Self::Store(value)
    }
}

impl Classify for SchedulingError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::InvalidArgument { .. }
            | Self::Duplicate { .. }
            | Self::InvalidCron { .. }
            | Self::UnknownTimezone { .. }
            | Self::Conflict { .. } => ErrorClass::Validation,
            Self::Store(e) => e.classify(),
        }
    }
}

/// Errors raised inside a worker tick. Unlike `SchedulingError`, these are
/// never surfaced to callers; the worker logs them and lets classification
/// drive retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// A store call failed.
    Store(eventide_store::StoreError),
    /// A bus publish failed.
    Bus(eventide_bus::BusError),
    /// The circuit breaker for a dependency is open.
    CircuitOpen { dependency: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::CircuitOpen { dependency } => write!(f, "circuit open for {dependency}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<eventide_store::StoreError> for WorkerError {
    fn from(value: eventide_store::StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<eventide_bus::BusError> for WorkerError {
    fn from(value: eventide_bus::BusError) -> Self {
        Self::Bus(value)
    }
}

impl Classify for WorkerError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Store(e) => e.classify(),
            Self::Bus(e) => e.classify(),
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_errors_classify_as_validation() {
        assert_eq!(
            SchedulingError::Duplicate { name: "x".into() }.classify(),
            ErrorClass::Validation
        );
        assert_eq!(
            SchedulingError::InvalidCron { message: "x".into() }.classify(),
            ErrorClass::Validation
        );
    }

    #[test]
    fn worker_error_wraps_store_classification() {
        let err = WorkerError::from(eventide_store::StoreError::Timeout);
        assert_eq!(err.classify(), ErrorClass::Timeout);
    }
}
