//! Tier data models and D/C/K store interfaces for the eventide scheduler.
//!
//! Each tier gets its own store trait plus an in-memory implementation for
//! tests and local development: [`DStore`]/[`InMemoryDStore`] for the
//! document tier, [`CStore`]/[`InMemoryCStore`] for the columnar tier, and
//! [`KStore`]/[`InMemoryKStore`] for the key-value tier.

pub mod analytics_store;
pub mod c_store;
pub mod d_store;
pub mod error;
pub mod k_store;
pub mod model;

pub use analytics_store::{AnalyticsStore, InMemoryAnalyticsStore};
pub use c_store::{CScanOrder, CStore, DelayedEventPatch, InMemoryCStore};
pub use d_store::{CronDefinitionPatch, DStore, InMemoryDStore};
pub use error::StoreError;
pub use k_store::{InMemoryKStore, KStore};
pub use model::{
    AnalyticsLevel, AnalyticsRow, AnalyticsTier, CronDefinition, CronStatus, DelayedEvent,
    DelayedEventStatus, EventSource, ExecutionOutcome, ExecutionRecord, ExecutionResult, HotEvent,
    HotEventStatus, ManifestOverrides,
};
