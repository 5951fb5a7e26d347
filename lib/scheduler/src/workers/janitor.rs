//! Janitor worker (§4.6): reclaims stuck claims, reconciles promotion
//! failures, enforces retention, and reports queue health.

use crate::config::EngineConfig;
use crate::error::WorkerError;
use chrono::{DateTime, Duration, Utc};
use eventide_store::{
    AnalyticsStore, CStore, DStore, DelayedEventPatch, DelayedEventStatus, HotEventStatus, KStore,
};
use std::sync::Arc;
use tracing::{instrument, warn};

/// What one `tick_now` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    /// Reserved K rows whose claim lock expired without completing, reset to
    /// `Pending`.
    pub stuck_claims_recovered: usize,
    /// C rows stuck in `Promoted` whose K counterpart is missing, re-inserted
    /// as a fresh C row for a retry promotion.
    pub orphaned_promotions_reinserted: usize,
    /// C rows stuck in `Promoted` whose K counterpart is present and healthy;
    /// left alone (the Promoter's C update simply lagged).
    pub promotions_confirmed: usize,
    /// Old completed/errored/skipped C rows purged by the retention sweep.
    pub c_rows_purged: u64,
    /// Old analytics rows purged by the retention sweep.
    pub analytics_rows_purged: u64,
    /// K index entries past their score with no live value, removed.
    pub expired_index_entries_purged: u64,
}

/// A point-in-time view of queue depth and health, for the admin `/stats`
/// surface (§3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHealthSnapshot {
    /// K entries ready to dispatch right now.
    pub ready_count: u64,
    /// K entries overdue past `janitor_index_grace_seconds`.
    pub overdue_count: u64,
    /// K entries scheduled further out than `now`.
    pub future_count: u64,
    /// `false` once `overdue_count` exceeds `queue_health_overdue_threshold`.
    pub healthy: bool,
}

/// Sweeps the K and C tiers for stuck or orphaned work, enforces retention,
/// and reports queue health.
pub struct Janitor {
    c_store: Arc<dyn CStore>,
    k_store: Arc<dyn KStore>,
    #[allow(dead_code)]
    d_store: Arc<dyn DStore>,
    analytics_store: Arc<dyn AnalyticsStore>,
    config: EngineConfig,
}

impl Janitor {
    /// Builds a new janitor over the given stores.
    #[must_use]
    pub fn new(
        c_store: Arc<dyn CStore>,
        k_store: Arc<dyn KStore>,
        d_store: Arc<dyn DStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            c_store,
            k_store,
            d_store,
            analytics_store,
            config,
        }
    }

    /// Runs one full sweep immediately, bypassing the timer.
    #[instrument(skip(self), fields(worker = "janitor"))]
    pub async fn tick_now(&self, now: DateTime<Utc>) -> Result<JanitorReport, WorkerError> {
        let mut report = JanitorReport::default();
        self.recover_stuck_claims(now, &mut report).await?;
        self.reconcile_promotions(now, &mut report).await?;
        self.enforce_retention(now, &mut report).await?;
        self.purge_expired_index(now, &mut report).await?;
        Ok(report)
    }

    async fn recover_stuck_claims(
        &self,
        now: DateTime<Utc>,
        report: &mut JanitorReport,
    ) -> Result<(), WorkerError> {
        let grace = Duration::seconds(self.config.janitor_stuck_claim_grace_seconds);
        let stuck = self.k_store.get_stuck_claims(now - grace).await?;
        for mut event in stuck {
            warn!(event = %event.id, holder = ?event.processor_id, "recovering stuck claim");
            event.status = HotEventStatus::Pending;
            event.processor_id = None;
            event.claimed_at = None;
            self.k_store.set_value(event).await?;
            report.stuck_claims_recovered += 1;
        }
        Ok(())
    }

    /// Rows stuck in `Promoted` past the grace period either have a healthy
    /// K counterpart (the Promoter's C write lagged behind its K write; left
    /// alone) or are missing one (the C write never landed, or the K row was
    /// since lost); those are re-inserted as a fresh pending C row so the
    /// Promoter retries the promotion.
    async fn reconcile_promotions(
        &self,
        now: DateTime<Utc>,
        report: &mut JanitorReport,
    ) -> Result<(), WorkerError> {
        let grace = Duration::seconds(self.config.janitor_index_grace_seconds);
        let stuck = self.c_store.get_stuck(now - grace).await?;
        for row in stuck {
            let Some(hot_id) = row.promoted_key else {
                continue;
            };
            match self.k_store.get_value(hot_id).await? {
                Some(_) => {
                    report.promotions_confirmed += 1;
                }
                None => {
                    warn!(event = %row.id, k_id = %hot_id, "promoted C row has no K counterpart, retrying promotion");
                    self.c_store
                        .mutate(
                            row.id,
                            DelayedEventPatch {
                                expected_status: Some(DelayedEventStatus::Promoted),
                                status: Some(DelayedEventStatus::Pending),
                                ..Default::default()
                            },
                        )
                        .await?;
                    report.orphaned_promotions_reinserted += 1;
                }
            }
        }
        Ok(())
    }

    async fn enforce_retention(
        &self,
        now: DateTime<Utc>,
        report: &mut JanitorReport,
    ) -> Result<(), WorkerError> {
        let c_threshold = now - Duration::days(self.config.retention_c_days);
        for status in [
            DelayedEventStatus::Completed,
            DelayedEventStatus::Error,
            DelayedEventStatus::Skipped,
        ] {
            report.c_rows_purged += self.c_store.delete_before(status, c_threshold).await?;
        }

        let analytics_threshold = now - Duration::days(self.config.retention_analytics_days);
        report.analytics_rows_purged = self.analytics_store.delete_before(analytics_threshold).await?;

        Ok(())
    }

    /// Removes K index entries more than `janitor_index_grace_seconds` past
    /// their score with no live value (§4.6).
    async fn purge_expired_index(
        &self,
        now: DateTime<Utc>,
        report: &mut JanitorReport,
    ) -> Result<(), WorkerError> {
        let threshold = now - Duration::seconds(self.config.janitor_index_grace_seconds);
        report.expired_index_entries_purged = self.k_store.purge_expired_index(threshold).await?;
        Ok(())
    }

    /// Computes the current queue-health snapshot for the admin `/stats`
    /// surface, without mutating anything.
    pub async fn queue_health(&self, now: DateTime<Utc>) -> Result<QueueHealthSnapshot, WorkerError> {
        let overdue_at = now - Duration::seconds(self.config.janitor_index_grace_seconds);
        let ready_count = self.k_store.index_count_due(now).await?;
        let overdue_count = self.k_store.index_count_due(overdue_at).await?;
        let future_count = self.k_store.index_count_future(now).await?;
        Ok(QueueHealthSnapshot {
            ready_count,
            overdue_count,
            future_count,
            healthy: overdue_count <= self.config.queue_health_overdue_threshold as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventide_core::{DelayedEventId, HotEventId};
    use eventide_store::{
        EventSource, HotEvent, InMemoryAnalyticsStore, InMemoryCStore, InMemoryDStore,
        InMemoryKStore,
    };
    use std::collections::HashMap;

    fn sample_hot_event(status: HotEventStatus, claimed_at: Option<DateTime<Utc>>) -> HotEvent {
        let now = Utc::now();
        HotEvent {
            id: HotEventId::new(),
            delayed_event_id: None,
            topic: "orders.created".into(),
            entity_type: "order".into(),
            action: "create".into(),
            entity_id: "1".into(),
            actor: "system".into(),
            payload: serde_json::json!({}),
            headers: HashMap::new(),
            scheduled_at: now,
            priority: 0,
            max_delay_seconds: 86_400,
            status,
            source: EventSource::Api,
            source_id: None,
            correlation_id: "corr-1".into(),
            retry_count: 0,
            max_retries: 3,
            stale_is_fatal: false,
            processor_id: claimed_at.map(|_| "node-a".to_string()),
            claimed_at,
            created_at: now,
            promoted_at: None,
            completed_at: None,
        }
    }

    fn sample_c_row(status: DelayedEventStatus) -> eventide_store::DelayedEvent {
        let now = Utc::now();
        eventide_store::DelayedEvent {
            id: DelayedEventId::new(),
            topic: "orders.created".into(),
            entity_type: "order".into(),
            action: "create".into(),
            entity_id: "1".into(),
            actor: "system".into(),
            payload: "{}".into(),
            headers: HashMap::new(),
            scheduled_at: now,
            priority: 0,
            max_delay_seconds: 86_400,
            status,
            source: EventSource::Api,
            source_id: None,
            correlation_id: "corr-1".into(),
            retry_count: 0,
            max_retries: 3,
            stale_is_fatal: false,
            node_id: None,
            lock_until: None,
            promoted_at: Some(now - Duration::minutes(10)),
            promoted_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn janitor() -> (Janitor, Arc<dyn CStore>, Arc<dyn KStore>) {
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let k_store: Arc<dyn KStore> = Arc::new(InMemoryKStore::new());
        let d_store: Arc<dyn DStore> = Arc::new(InMemoryDStore::new());
        let analytics_store: Arc<dyn AnalyticsStore> = Arc::new(InMemoryAnalyticsStore::new());
        let janitor = Janitor::new(
            c_store.clone(),
            k_store.clone(),
            d_store,
            analytics_store,
            EngineConfig::default(),
        );
        (janitor, c_store, k_store)
    }

    #[tokio::test]
    async fn recovers_a_claim_expired_past_grace() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        let event = sample_hot_event(HotEventStatus::Reserved, Some(now - Duration::minutes(5)));
        let id = event.id;
        k_store.set_value(event).await.unwrap();

        let report = janitor.tick_now(now).await.unwrap();
        assert_eq!(report.stuck_claims_recovered, 1);

        let recovered = k_store.get_value(id).await.unwrap().unwrap();
        assert_eq!(recovered.status, HotEventStatus::Pending);
        assert!(recovered.processor_id.is_none());
    }

    #[tokio::test]
    async fn leaves_a_fresh_claim_alone() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        let event = sample_hot_event(HotEventStatus::Reserved, Some(now - Duration::seconds(5)));
        k_store.set_value(event).await.unwrap();

        let report = janitor.tick_now(now).await.unwrap();
        assert_eq!(report.stuck_claims_recovered, 0);
    }

    #[tokio::test]
    async fn reinserts_orphaned_promotion_missing_its_k_counterpart() {
        let (janitor, c_store, _k_store) = janitor();
        let now = Utc::now();
        let mut row = sample_c_row(DelayedEventStatus::Promoted);
        row.promoted_key = Some(HotEventId::new());
        let id = c_store.insert(row).await.unwrap();

        let report = janitor.tick_now(now).await.unwrap();
        assert_eq!(report.orphaned_promotions_reinserted, 1);

        let reconciled = c_store.get(id).await.unwrap().unwrap();
        assert_eq!(reconciled.status, DelayedEventStatus::Pending);
    }

    #[tokio::test]
    async fn confirms_promotion_whose_k_counterpart_is_present() {
        let (janitor, c_store, k_store) = janitor();
        let now = Utc::now();
        let hot_id = HotEventId::new();
        let mut row = sample_c_row(DelayedEventStatus::Promoted);
        row.promoted_key = Some(hot_id);
        c_store.insert(row).await.unwrap();
        let mut hot = sample_hot_event(HotEventStatus::Pending, None);
        hot.id = hot_id;
        k_store.set_value(hot).await.unwrap();

        let report = janitor.tick_now(now).await.unwrap();
        assert_eq!(report.promotions_confirmed, 1);
        assert_eq!(report.orphaned_promotions_reinserted, 0);
    }

    #[tokio::test]
    async fn tick_reports_zero_expired_index_entries_against_the_in_memory_backend() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        let mut stale = sample_hot_event(HotEventStatus::Pending, None);
        stale.scheduled_at = now - Duration::hours(1);
        k_store.set_value(stale).await.unwrap();

        let report = janitor.tick_now(now).await.unwrap();
        assert_eq!(report.expired_index_entries_purged, 0);
    }

    #[tokio::test]
    async fn queue_health_flags_unhealthy_when_overdue_count_exceeds_threshold() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        // Default grace is 5 min and default threshold is 10: 11 entries
        // overdue by 10 min each trips unhealthy.
        for _ in 0..11 {
            let mut overdue = sample_hot_event(HotEventStatus::Pending, None);
            overdue.scheduled_at = now - Duration::minutes(10);
            k_store.set_value(overdue).await.unwrap();
        }

        let snapshot = janitor.queue_health(now).await.unwrap();
        assert!(!snapshot.healthy);
        assert!(snapshot.overdue_count > 10);
    }

    #[tokio::test]
    async fn queue_health_is_healthy_within_grace_period_and_under_threshold() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        // 10 s overdue is well within the 5-minute grace period, so it
        // should not even count as overdue.
        let mut barely_late = sample_hot_event(HotEventStatus::Pending, None);
        barely_late.scheduled_at = now - Duration::seconds(10);
        k_store.set_value(barely_late).await.unwrap();

        let snapshot = janitor.queue_health(now).await.unwrap();
        assert_eq!(snapshot.overdue_count, 0);
        assert!(snapshot.healthy);
    }

    #[tokio::test]
    async fn queue_health_is_healthy_with_overdue_count_at_or_under_threshold() {
        let (janitor, _c_store, k_store) = janitor();
        let now = Utc::now();
        // 10 entries past the grace period, at the threshold of 10, is
        // still healthy: only exceeding the threshold flips it.
        for _ in 0..10 {
            let mut overdue = sample_hot_event(HotEventStatus::Pending, None);
            overdue.scheduled_at = now - Duration::minutes(10);
            k_store.set_value(overdue).await.unwrap();
        }

        let snapshot = janitor.queue_health(now).await.unwrap();
        assert_eq!(snapshot.overdue_count, 10);
        assert!(snapshot.healthy);
    }
}
