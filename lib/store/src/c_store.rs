//! C-tier (columnar) store: the durable long-horizon queue of one-shot
//! delayed events.

use crate::error::StoreError;
use crate::model::{DelayedEvent, DelayedEventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventide_core::{DelayedEventId, HotEventId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Ordering for a C-tier range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CScanOrder {
    /// `(scheduled_at asc, priority desc)`, the Promoter's batch order.
    ScheduledAtAscPriorityDesc,
    /// `created_at asc`, used for retention sweeps.
    CreatedAtAsc,
}

/// A conditional partial update to a `DelayedEvent`, applied only if the row
/// is currently in `expected_status`.
#[derive(Debug, Clone, Default)]
pub struct DelayedEventPatch {
    /// Required current status for the patch to apply.
    pub expected_status: Option<DelayedEventStatus>,
    /// New status.
    pub status: Option<DelayedEventStatus>,
    /// New promotion timestamp.
    pub promoted_at: Option<DateTime<Utc>>,
    /// New promotion target id.
    pub promoted_key: Option<HotEventId>,
    /// New processing node id.
    pub node_id: Option<String>,
    /// New lock expiry.
    pub lock_until: Option<DateTime<Utc>>,
}

/// Store interface for the C-tier (columnar store).
#[async_trait]
pub trait CStore: Send + Sync {
    /// Inserts a new row, returning its id.
    async fn insert(&self, event: DelayedEvent) -> Result<DelayedEventId, StoreError>;

    /// Range-scans rows with the given status and `scheduled_at <=
    /// scheduled_at_upper`, in `order`, bounded by `limit`.
    async fn range_scan(
        &self,
        status: DelayedEventStatus,
        scheduled_at_upper: DateTime<Utc>,
        limit: usize,
        order: CScanOrder,
    ) -> Result<Vec<DelayedEvent>, StoreError>;

    /// Fetches a single row by id.
    async fn get(&self, id: DelayedEventId) -> Result<Option<DelayedEvent>, StoreError>;

    /// Applies a conditional patch. Returns `ConditionFailed` if the row's
    /// current status does not match `patch.expected_status`.
    async fn mutate(&self, id: DelayedEventId, patch: DelayedEventPatch) -> Result<(), StoreError>;

    /// Counts rows by status.
    async fn count_by_status(&self, status: DelayedEventStatus) -> Result<u64, StoreError>;

    /// Deletes rows in `status` with `created_at` older than `timestamp`.
    /// Returns the number of rows deleted.
    async fn delete_before(
        &self,
        status: DelayedEventStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Returns rows with `status == Promoted` and `promoted_at` older than
    /// `threshold`, for the Janitor's promotion-integrity sweep.
    async fn get_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedEvent>, StoreError>;
}

/// An in-memory `CStore` for tests and local development.
#[derive(Default)]
pub struct InMemoryCStore {
    rows: Mutex<HashMap<DelayedEventId, DelayedEvent>>,
}

impl InMemoryCStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CStore for InMemoryCStore {
    async fn insert(&self, event: DelayedEvent) -> Result<DelayedEventId, StoreError> {
        let id = event.id;
        self.rows.lock().unwrap().insert(id, event);
        Ok(id)
    }

    async fn range_scan(
        &self,
        status: DelayedEventStatus,
        scheduled_at_upper: DateTime<Utc>,
        limit: usize,
        order: CScanOrder,
    ) -> Result<Vec<DelayedEvent>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<DelayedEvent> = rows
            .values()
            .filter(|e| e.status == status && e.scheduled_at <= scheduled_at_upper)
            .cloned()
            .collect();
        match order {
            CScanOrder::ScheduledAtAscPriorityDesc => {
                matched.sort_by(|a, b| {
                    a.scheduled_at
                        .cmp(&b.scheduled_at)
                        .then_with(|| b.priority.cmp(&a.priority))
                });
            }
            CScanOrder::CreatedAtAsc => {
                matched.sort_by_key(|e| e.created_at);
            }
        }
        matched.truncate(limit);
        Ok(matched)
    }

    async fn get(&self, id: DelayedEventId) -> Result<Option<DelayedEvent>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn mutate(&self, id: DelayedEventId, patch: DelayedEventPatch) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        if let Some(expected) = patch.expected_status
            && row.status != expected
        {
            return Err(StoreError::ConditionFailed {
                message: format!("expected status {expected:?}, found {:?}", row.status),
            });
        }

        if let Some(status) = patch.status {
            row.status = status;
        }
        if let Some(promoted_at) = patch.promoted_at {
            row.promoted_at = Some(promoted_at);
        }
        if let Some(promoted_key) = patch.promoted_key {
            row.promoted_key = Some(promoted_key);
        }
        if let Some(node_id) = patch.node_id {
            row.node_id = Some(node_id);
        }
        if let Some(lock_until) = patch.lock_until {
            row.lock_until = Some(lock_until);
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn count_by_status(&self, status: DelayedEventStatus) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.status == status)
            .count() as u64)
    }

    async fn delete_before(
        &self,
        status: DelayedEventStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, e| !(e.status == status && e.created_at < timestamp));
        Ok((before - rows.len()) as u64)
    }

    async fn get_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedEvent>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.status == DelayedEventStatus::Promoted
                    && e.promoted_at.is_some_and(|p| p < threshold)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn sample_event(scheduled_at: DateTime<Utc>, priority: i32) -> DelayedEvent {
        let now = Utc::now();
        DelayedEvent {
            id: DelayedEventId::new(),
            topic: "x".into(),
            entity_type: "a".into(),
            action: "b".into(),
            entity_id: "1".into(),
            actor: "system".into(),
            payload: "{}".into(),
            headers: StdHashMap::new(),
            scheduled_at,
            priority,
            max_delay_seconds: 86_400,
            status: DelayedEventStatus::Pending,
            source: crate::model::EventSource::Api,
            source_id: None,
            correlation_id: "corr".into(),
            retry_count: 0,
            max_retries: 3,
            stale_is_fatal: false,
            node_id: None,
            lock_until: None,
            promoted_at: None,
            promoted_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn range_scan_orders_by_scheduled_at_then_priority_desc() {
        let store = InMemoryCStore::new();
        let now = Utc::now();
        let low_pri_early = sample_event(now, 1);
        let high_pri_early = sample_event(now, 5);
        let later = sample_event(now + chrono::Duration::seconds(10), 10);

        store.insert(low_pri_early.clone()).await.unwrap();
        store.insert(high_pri_early.clone()).await.unwrap();
        store.insert(later.clone()).await.unwrap();

        let scanned = store
            .range_scan(
                DelayedEventStatus::Pending,
                now + chrono::Duration::seconds(20),
                10,
                CScanOrder::ScheduledAtAscPriorityDesc,
            )
            .await
            .unwrap();

        assert_eq!(scanned[0].id, high_pri_early.id);
        assert_eq!(scanned[1].id, low_pri_early.id);
        assert_eq!(scanned[2].id, later.id);
    }

    #[tokio::test]
    async fn mutate_fails_on_status_mismatch() {
        let store = InMemoryCStore::new();
        let event = sample_event(Utc::now(), 0);
        let id = store.insert(event).await.unwrap();

        let err = store
            .mutate(
                id,
                DelayedEventPatch {
                    expected_status: Some(DelayedEventStatus::Promoted),
                    status: Some(DelayedEventStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { .. }));
    }

    #[tokio::test]
    async fn delete_before_only_removes_matching_status() {
        let store = InMemoryCStore::new();
        let old = Utc::now() - chrono::Duration::days(40);
        let mut stale_row = sample_event(old, 0);
        stale_row.status = DelayedEventStatus::Completed;
        stale_row.created_at = old;
        store.insert(stale_row).await.unwrap();

        let fresh_row = sample_event(Utc::now(), 0);
        store.insert(fresh_row).await.unwrap();

        let deleted = store
            .delete_before(DelayedEventStatus::Completed, Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            store.count_by_status(DelayedEventStatus::Pending).await.unwrap(),
            1
        );
    }
}
