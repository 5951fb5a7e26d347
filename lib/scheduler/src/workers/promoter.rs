//! Promoter worker (§4.3): moves C-tier events whose fire time is within the
//! promotion horizon to K, in fire-time order.

use crate::analytics;
use crate::config::EngineConfig;
use crate::error::WorkerError;
use chrono::{DateTime, Duration, Utc};
use eventide_core::HotEventId;
use eventide_store::{
    AnalyticsStore, CScanOrder, CStore, DelayedEvent, DelayedEventPatch, DelayedEventStatus,
    HotEvent, HotEventStatus, KStore,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What one `tick_now` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoterReport {
    /// Rows promoted to K successfully.
    pub promoted: usize,
    /// Rows whose K write succeeded but whose C status update failed; left
    /// for the Janitor's promotion-integrity sweep to reconcile.
    pub partially_promoted: usize,
    /// Rows whose K write itself failed; left pending for retry.
    pub failed: usize,
}

/// Moves due C-tier rows into the K-tier hot queue.
pub struct Promoter {
    c_store: Arc<dyn CStore>,
    k_store: Arc<dyn KStore>,
    analytics_store: Arc<dyn AnalyticsStore>,
    config: EngineConfig,
}

impl Promoter {
    /// Builds a new promoter over the given stores.
    #[must_use]
    pub fn new(
        c_store: Arc<dyn CStore>,
        k_store: Arc<dyn KStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            c_store,
            k_store,
            analytics_store,
            config,
        }
    }

    /// Runs one tick immediately, bypassing the timer.
    #[instrument(skip(self), fields(worker = "promoter"))]
    pub async fn tick_now(&self, now: DateTime<Utc>) -> Result<PromoterReport, WorkerError> {
        let h1 = Duration::seconds(self.config.promotion_horizon_h1_seconds);
        let due = self
            .c_store
            .range_scan(
                DelayedEventStatus::Pending,
                now + h1,
                self.config.promote_batch,
                CScanOrder::ScheduledAtAscPriorityDesc,
            )
            .await?;

        let mut report = PromoterReport::default();
        for row in due {
            match self.promote_one(&row, now).await {
                Ok(PromoteOutcome::Promoted) => report.promoted += 1,
                Ok(PromoteOutcome::PartiallyPromoted) => report.partially_promoted += 1,
                Ok(PromoteOutcome::Failed) => report.failed += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    async fn promote_one(
        &self,
        row: &DelayedEvent,
        now: DateTime<Utc>,
    ) -> Result<PromoteOutcome, WorkerError> {
        let payload = serde_json::from_str(&row.payload)
            .unwrap_or_else(|_| serde_json::Value::String(row.payload.clone()));
        let hot_id = HotEventId::new();
        let hot_event = HotEvent {
            id: hot_id,
            delayed_event_id: Some(row.id),
            topic: row.topic.clone(),
            entity_type: row.entity_type.clone(),
            action: row.action.clone(),
            entity_id: row.entity_id.clone(),
            actor: row.actor.clone(),
            payload,
            headers: row.headers.clone(),
            scheduled_at: row.scheduled_at,
            priority: row.priority,
            max_delay_seconds: row.max_delay_seconds,
            status: HotEventStatus::Pending,
            source: row.source,
            source_id: row.source_id.clone(),
            correlation_id: row.correlation_id.clone(),
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            stale_is_fatal: row.stale_is_fatal,
            processor_id: None,
            claimed_at: None,
            created_at: row.created_at,
            promoted_at: Some(now),
            completed_at: None,
        };

        if let Err(e) = self.k_store.set_value(hot_event).await {
            warn!(event = %row.id, error = %e, "K write failed, leaving row pending for retry");
            return Ok(PromoteOutcome::Failed);
        }

        let mutate_result = self
            .c_store
            .mutate(
                row.id,
                DelayedEventPatch {
                    expected_status: Some(DelayedEventStatus::Pending),
                    status: Some(DelayedEventStatus::Promoted),
                    promoted_at: Some(now),
                    promoted_key: Some(hot_id),
                    ..Default::default()
                },
            )
            .await;

        if let Err(e) = mutate_result {
            warn!(
                event = %row.id, k_id = %hot_id, error = %e,
                "K write succeeded but C promotion update failed; promotion-integrity sweep will reconcile"
            );
            return Ok(PromoteOutcome::PartiallyPromoted);
        }

        let analytics_row = analytics::promotion_row(
            row.id,
            row.correlation_id.clone(),
            format!("{}.{}", row.topic, row.action),
            row.scheduled_at,
            row.created_at,
            now,
        );
        if let Err(e) = self.analytics_store.append(analytics_row).await {
            warn!(event = %row.id, error = %e, "failed to append promotion analytics row");
        }

        debug!(event = %row.id, k_id = %hot_id, "promoted to K");
        Ok(PromoteOutcome::Promoted)
    }
}

enum PromoteOutcome {
    Promoted,
    PartiallyPromoted,
    Failed,
}
