//! The analytics sink (columnar): one append-only row per state transition,
//! queryable for performance analysis. A fourth narrow store interface
//! alongside D/C/K, since it is written by every worker but owned by none of
//! them.

use crate::error::StoreError;
use crate::model::AnalyticsRow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Store interface for the analytics sink.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Appends a row. Analytics rows are never mutated after creation.
    async fn append(&self, row: AnalyticsRow) -> Result<(), StoreError>;

    /// Returns rows created at or after `since`, most recent first, bounded
    /// by `limit`. Used by the admin surface and tests.
    async fn recent(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<AnalyticsRow>, StoreError>;

    /// Deletes rows older than `threshold`, for the Janitor's retention
    /// sweep. Returns the number of rows deleted.
    async fn delete_before(&self, threshold: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// An in-memory `AnalyticsStore` for tests and local development.
#[derive(Default)]
pub struct InMemoryAnalyticsStore {
    rows: Mutex<Vec<AnalyticsRow>>,
}

impl InMemoryAnalyticsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn append(&self, row: AnalyticsRow) -> Result<(), StoreError> {
        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn recent(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<AnalyticsRow>, StoreError> {
        let mut rows: Vec<AnalyticsRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_before(&self, threshold: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.created_at >= threshold);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalyticsLevel, AnalyticsTier, ExecutionResult};
    use eventide_core::AnalyticsRowId;

    fn sample_row(created_at: DateTime<Utc>) -> AnalyticsRow {
        AnalyticsRow {
            id: AnalyticsRowId::new(),
            tier: AnalyticsTier::Dispatch,
            schedule_or_event_id: "evt-1".into(),
            correlation_id: "corr-1".into(),
            event_identity: "orders.created".into(),
            scheduled_at: None,
            started_processing_at: None,
            completed_at: None,
            execution_result: ExecutionResult::Success,
            retry_count: 0,
            time_in_c_queue_ms: None,
            time_in_k_queue_ms: None,
            total_duration_ms: None,
            bus_topic: None,
            bus_partition: None,
            bus_offset: None,
            processing_node: None,
            error_message: None,
            level: AnalyticsLevel::Info,
            created_at,
        }
    }

    #[tokio::test]
    async fn recent_excludes_rows_before_since() {
        let store = InMemoryAnalyticsStore::new();
        let now = Utc::now();
        store.append(sample_row(now - chrono::Duration::days(1))).await.unwrap();
        store.append(sample_row(now)).await.unwrap();

        let rows = store.recent(now - chrono::Duration::minutes(1), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn delete_before_removes_old_rows_only() {
        let store = InMemoryAnalyticsStore::new();
        let now = Utc::now();
        store.append(sample_row(now - chrono::Duration::days(91))).await.unwrap();
        store.append(sample_row(now)).await.unwrap();

        let deleted = store.delete_before(now - chrono::Duration::days(90)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.recent(now - chrono::Duration::days(100), 10).await.unwrap().len(), 1);
    }
}
