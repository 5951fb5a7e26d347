//! K-tier (key-value) store: the hot, claim-lockable near-term dispatch
//! queue plus its time-sorted index.

use crate::error::StoreError;
use crate::model::{HotEvent, HotEventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eventide_core::HotEventId;

/// Store interface for the K-tier (key-value store): a value table keyed by
/// id plus a time-sorted index over `scheduled_at`, and the claim-lock
/// primitive that makes at-most-one-publish possible across replicas.
#[async_trait]
pub trait KStore: Send + Sync {
    /// Inserts or replaces a value, and adds it to the time-sorted index.
    async fn set_value(&self, event: HotEvent) -> Result<(), StoreError>;

    /// Fetches a value by id.
    async fn get_value(&self, id: HotEventId) -> Result<Option<HotEvent>, StoreError>;

    /// Deletes a value and removes it from the index.
    async fn delete_value(&self, id: HotEventId) -> Result<(), StoreError>;

    /// Conditionally transitions a value's status from `expected` to `next`.
    /// Fails with `ConditionFailed` if the current status does not match
    /// `expected`, implementing the CAS the Dispatcher relies on to claim
    /// exactly one winner across replicas.
    async fn cas_value_status(
        &self,
        id: HotEventId,
        expected: HotEventStatus,
        next: HotEventStatus,
    ) -> Result<(), StoreError>;

    /// Returns ids with `scheduled_at <= upper`, ascending by score, bounded
    /// by `limit`.
    async fn index_range_by_score(
        &self,
        upper: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HotEventId>, StoreError>;

    /// Counts entries in the index with `scheduled_at <= upper`.
    async fn index_count_due(&self, upper: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Counts entries in the index with `scheduled_at > upper` (the "future"
    /// bucket of the queue-health snapshot).
    async fn index_count_future(&self, upper: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Attempts to take a short-TTL claim lock on `id` for `processor_id`.
    /// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if another
    /// processor already holds an unexpired lock.
    async fn try_lock(
        &self,
        id: HotEventId,
        processor_id: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool, StoreError>;

    /// Releases a lock held by `processor_id`. A no-op if the lock has
    /// already expired or is held by someone else.
    async fn unlock(&self, id: HotEventId, processor_id: &str) -> Result<(), StoreError>;

    /// Returns values whose claim lock expired before `threshold` but whose
    /// status is still `Reserved`, for the Janitor's stuck-claim sweep.
    async fn get_stuck_claims(&self, threshold: DateTime<Utc>) -> Result<Vec<HotEvent>, StoreError>;

    /// Removes index entries scored at or before `threshold` that have no
    /// corresponding live value, for the Janitor's "expired K index
    /// entries" sweep. Returns the number removed.
    async fn purge_expired_index(&self, threshold: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// An in-memory `KStore` backed by `DashMap` for realistic claim-lock
/// contention under concurrent access.
#[derive(Default)]
pub struct InMemoryKStore {
    values: DashMap<HotEventId, HotEvent>,
}

impl InMemoryKStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KStore for InMemoryKStore {
    async fn set_value(&self, event: HotEvent) -> Result<(), StoreError> {
        self.values.insert(event.id, event);
        Ok(())
    }

    async fn get_value(&self, id: HotEventId) -> Result<Option<HotEvent>, StoreError> {
        Ok(self.values.get(&id).map(|e| e.clone()))
    }

    async fn delete_value(&self, id: HotEventId) -> Result<(), StoreError> {
        self.values.remove(&id);
        Ok(())
    }

    async fn cas_value_status(
        &self,
        id: HotEventId,
        expected: HotEventStatus,
        next: HotEventStatus,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .values
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if entry.status != expected {
            return Err(StoreError::ConditionFailed {
                message: format!("expected status {expected:?}, found {:?}", entry.status),
            });
        }
        entry.status = next;
        Ok(())
    }

    async fn index_range_by_score(
        &self,
        upper: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HotEventId>, StoreError> {
        let mut due: Vec<(DateTime<Utc>, HotEventId)> = self
            .values
            .iter()
            .filter(|e| e.status == HotEventStatus::Pending && e.scheduled_at <= upper)
            .map(|e| (e.scheduled_at, e.id))
            .collect();
        due.sort();
        due.truncate(limit);
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn index_count_due(&self, upper: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .values
            .iter()
            .filter(|e| e.status == HotEventStatus::Pending && e.scheduled_at <= upper)
            .count() as u64)
    }

    async fn index_count_future(&self, upper: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .values
            .iter()
            .filter(|e| e.status == HotEventStatus::Pending && e.scheduled_at > upper)
            .count() as u64)
    }

    async fn try_lock(
        &self,
        id: HotEventId,
        processor_id: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool, StoreError> {
        let mut entry = self
            .values
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        let lock_is_free = entry
            .claimed_at
            .zip(entry.processor_id.as_ref())
            .map(|(claimed_at, holder)| {
                holder == processor_id || claimed_at + ttl <= now
            })
            .unwrap_or(true);

        if !lock_is_free {
            return Ok(false);
        }

        entry.processor_id = Some(processor_id.to_string());
        entry.claimed_at = Some(now);
        entry.status = HotEventStatus::Reserved;
        Ok(true)
    }

    async fn unlock(&self, id: HotEventId, processor_id: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.values.get_mut(&id)
            && entry.processor_id.as_deref() == Some(processor_id)
        {
            entry.processor_id = None;
            entry.claimed_at = None;
        }
        Ok(())
    }

    async fn get_stuck_claims(&self, threshold: DateTime<Utc>) -> Result<Vec<HotEvent>, StoreError> {
        Ok(self
            .values
            .iter()
            .filter(|e| {
                e.status == HotEventStatus::Reserved
                    && e.claimed_at.is_some_and(|c| c < threshold)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn purge_expired_index(&self, _threshold: DateTime<Utc>) -> Result<u64, StoreError> {
        // This backend keeps the index and the value table in the same
        // `DashMap`: every index entry IS a live value, so there is nothing
        // for the index to desync from. A durable backend maintaining a
        // separate sorted-set index would remove stale pointers here.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventSource;
    use std::collections::HashMap;

    fn sample_event(scheduled_at: DateTime<Utc>) -> HotEvent {
        let now = Utc::now();
        HotEvent {
            id: HotEventId::new(),
            delayed_event_id: None,
            topic: "x".into(),
            entity_type: "a".into(),
            action: "b".into(),
            entity_id: "1".into(),
            actor: "system".into(),
            payload: serde_json::json!({}),
            headers: HashMap::new(),
            scheduled_at,
            priority: 0,
            max_delay_seconds: 86_400,
            status: HotEventStatus::Pending,
            source: EventSource::Api,
            source_id: None,
            correlation_id: "corr".into(),
            retry_count: 0,
            max_retries: 3,
            stale_is_fatal: false,
            processor_id: None,
            claimed_at: None,
            created_at: now,
            promoted_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn try_lock_prevents_second_claimant_until_ttl_expires() {
        let store = InMemoryKStore::new();
        let now = Utc::now();
        let event = sample_event(now);
        let id = event.id;
        store.set_value(event).await.unwrap();

        let ttl = chrono::Duration::seconds(30);
        assert!(store.try_lock(id, "node-a", now, ttl).await.unwrap());
        assert!(!store.try_lock(id, "node-b", now, ttl).await.unwrap());

        let past_ttl = now + chrono::Duration::seconds(31);
        assert!(store.try_lock(id, "node-b", past_ttl, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn cas_value_status_rejects_mismatch() {
        let store = InMemoryKStore::new();
        let event = sample_event(Utc::now());
        let id = event.id;
        store.set_value(event).await.unwrap();

        let err = store
            .cas_value_status(id, HotEventStatus::Reserved, HotEventStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { .. }));

        store
            .cas_value_status(id, HotEventStatus::Pending, HotEventStatus::Reserved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn index_range_by_score_only_returns_pending_due_entries() {
        let store = InMemoryKStore::new();
        let now = Utc::now();
        let due = sample_event(now - chrono::Duration::seconds(5));
        let future = sample_event(now + chrono::Duration::hours(1));
        let due_id = due.id;

        store.set_value(due).await.unwrap();
        store.set_value(future).await.unwrap();

        let ids = store.index_range_by_score(now, 10).await.unwrap();
        assert_eq!(ids, vec![due_id]);
        assert_eq!(store.index_count_future(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_stuck_claims_finds_expired_reservations() {
        let store = InMemoryKStore::new();
        let now = Utc::now();
        let mut event = sample_event(now);
        event.status = HotEventStatus::Reserved;
        event.processor_id = Some("node-a".into());
        event.claimed_at = Some(now - chrono::Duration::minutes(5));
        let id = event.id;
        store.set_value(event).await.unwrap();

        let stuck = store
            .get_stuck_claims(now - chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, id);
    }

    #[tokio::test]
    async fn purge_expired_index_finds_nothing_when_index_and_values_coincide() {
        let store = InMemoryKStore::new();
        let now = Utc::now();
        let stale = sample_event(now - chrono::Duration::hours(1));
        store.set_value(stale).await.unwrap();

        let purged = store.purge_expired_index(now).await.unwrap();
        assert_eq!(purged, 0, "every index entry has a live value in this backend");
    }
}
