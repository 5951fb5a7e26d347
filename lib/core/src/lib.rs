//! Core domain types and utilities for the eventide scheduler.
//!
//! This crate provides the foundational ID types, error handling, and
//! classification taxonomy shared by every other crate in the workspace.

pub mod envelope;
pub mod error;
pub mod id;

pub use envelope::Envelope;
pub use error::{Classify, ErrorClass};
pub use id::{
    AnalyticsRowId, CronDefinitionId, DelayedEventId, ExecutionRecordId, HotEventId, ParseIdError,
};
