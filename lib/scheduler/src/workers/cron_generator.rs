//! CronGenerator worker (§4.2): walks due cron definitions, emits one C-tier
//! event per due firing, advances the definition's next-fire time.

use crate::analytics;
use crate::config::EngineConfig;
use crate::error::WorkerError;
use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use eventide_core::DelayedEventId;
use eventide_store::{
    AnalyticsStore, CStore, CronDefinition, CronDefinitionPatch, CronStatus, DStore, DelayedEvent,
    DelayedEventStatus, EventSource, ExecutionRecord,
};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use ulid::Ulid;

/// What one `tick_now` call did, for tests and the engine's `status()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CronGeneratorReport {
    /// Definitions that fired and advanced successfully.
    pub fired: usize,
    /// Definitions disabled this tick because their cron expression stopped
    /// parsing.
    pub disabled: usize,
    /// Definitions left untouched because the C insert failed; retried next
    /// tick.
    pub failed: usize,
}

/// Walks due cron definitions and generates C-tier events for them.
pub struct CronGenerator {
    d_store: Arc<dyn DStore>,
    c_store: Arc<dyn CStore>,
    analytics_store: Arc<dyn AnalyticsStore>,
    config: EngineConfig,
}

impl CronGenerator {
    /// Builds a new generator over the given stores.
    #[must_use]
    pub fn new(
        d_store: Arc<dyn DStore>,
        c_store: Arc<dyn CStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            d_store,
            c_store,
            analytics_store,
            config,
        }
    }

    /// Runs one tick immediately, bypassing the timer. Used by the engine's
    /// manual-trigger admin action and by tests.
    #[instrument(skip(self), fields(worker = "cron_generator"))]
    pub async fn tick_now(&self, now: DateTime<Utc>) -> Result<CronGeneratorReport, WorkerError> {
        let due = self
            .d_store
            .find_due(now, self.config.cron_batch)
            .await?;

        let mut report = CronGeneratorReport::default();
        for definition in due {
            match self.fire_one(&definition, now).await {
                Ok(FireOutcome::Fired) => report.fired += 1,
                Ok(FireOutcome::Disabled) => report.disabled += 1,
                Ok(FireOutcome::DeferredToNextTick) => report.failed += 1,
                Err(e) => {
                    error!(definition = %definition.id, error = %e, "cron firing failed unexpectedly");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn fire_one(
        &self,
        definition: &CronDefinition,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, WorkerError> {
        let Some(fire_time) = definition.next_fire else {
            return Ok(FireOutcome::DeferredToNextTick);
        };

        let correlation_id = Ulid::new().to_string();
        let event = DelayedEvent {
            id: DelayedEventId::new(),
            topic: definition.event_type.clone(),
            entity_type: definition.event_type.clone(),
            action: definition.action.clone(),
            entity_id: definition.name.clone(),
            actor: definition.actor.clone(),
            payload: definition.default_payload.clone(),
            headers: std::collections::HashMap::new(),
            scheduled_at: fire_time,
            priority: 0,
            max_delay_seconds: self.config.max_delay_default_seconds,
            status: DelayedEventStatus::Pending,
            source: EventSource::Cron,
            source_id: Some(definition.id.to_string()),
            correlation_id: correlation_id.clone(),
            retry_count: 0,
            max_retries: definition.max_retries,
            stale_is_fatal: self.config.stale_is_fatal,
            node_id: None,
            lock_until: None,
            promoted_at: None,
            promoted_key: None,
            created_at: now,
            updated_at: now,
        };

        let c_id = match self.c_store.insert(event).await {
            Ok(id) => id,
            Err(e) => {
                warn!(definition = %definition.id, error = %e, "C insert failed, retrying next tick");
                return Ok(FireOutcome::DeferredToNextTick);
            }
        };

        self.d_store
            .append_execution(ExecutionRecord::success(definition.id, fire_time, c_id))
            .await?;

        let schedule = match CronSchedule::parse(&definition.cron_expression, &definition.timezone) {
            Ok(s) => s,
            Err(e) => {
                self.disable_definition(definition, &e.to_string()).await?;
                return Ok(FireOutcome::Disabled);
            }
        };
        let next_fire = schedule.next_after(now);

        self.d_store
            .update_by_id(
                definition.id,
                CronDefinitionPatch {
                    last_fire: Some(fire_time),
                    next_fire,
                    increment_exec_count: true,
                    ..Default::default()
                },
            )
            .await?;

        let row = analytics::cron_row(
            definition.id,
            correlation_id,
            format!("{}.{}", definition.event_type, definition.action),
            fire_time,
            eventide_store::ExecutionResult::Success,
            eventide_store::AnalyticsLevel::Info,
            None,
        );
        if let Err(e) = self.analytics_store.append(row).await {
            warn!(definition = %definition.id, error = %e, "failed to append cron analytics row");
        }

        debug!(definition = %definition.id, c_id = %c_id, "cron fired");
        Ok(FireOutcome::Fired)
    }

    async fn disable_definition(
        &self,
        definition: &CronDefinition,
        error_message: &str,
    ) -> Result<(), WorkerError> {
        warn!(definition = %definition.id, error = %error_message, "disabling cron definition: schedule no longer parses");
        self.d_store
            .update_by_id(
                definition.id,
                CronDefinitionPatch {
                    status: Some(CronStatus::Disabled),
                    last_error: Some(error_message.to_string()),
                    increment_error_count: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

enum FireOutcome {
    Fired,
    Disabled,
    DeferredToNextTick,
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventide_store::{InMemoryAnalyticsStore, InMemoryCStore, InMemoryDStore};

    fn generator() -> (CronGenerator, Arc<dyn DStore>, Arc<dyn CStore>) {
        let d_store: Arc<dyn DStore> = Arc::new(InMemoryDStore::new());
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let analytics_store: Arc<dyn AnalyticsStore> = Arc::new(InMemoryAnalyticsStore::new());
        let generator = CronGenerator::new(
            d_store.clone(),
            c_store.clone(),
            analytics_store,
            EngineConfig::default(),
        );
        (generator, d_store, c_store)
    }

    #[tokio::test]
    async fn fires_due_definition_and_advances_next_fire() {
        let (generator, d_store, c_store) = generator();
        let now = Utc::now();
        let mut def = CronDefinition::new(
            "daily-report", "report", "generate", "{}", "system", "0 7 * * *", "UTC", 3,
        );
        def.next_fire = Some(now - chrono::Duration::seconds(1));
        let id = d_store.create(def).await.unwrap();

        let report = generator.tick_now(now).await.unwrap();
        assert_eq!(report.fired, 1);

        let updated = d_store.get(id).await.unwrap().unwrap();
        assert!(updated.next_fire.unwrap() > now);
        assert_eq!(updated.exec_count, 1);
        assert_eq!(c_store.count_by_status(DelayedEventStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missed_fires_collapse_into_a_single_firing() {
        let (generator, d_store, c_store) = generator();
        let now = Utc::now();
        let mut def = CronDefinition::new(
            "hourly-sync", "sync", "run", "{}", "system", "0 * * * *", "UTC", 3,
        );
        def.next_fire = Some(now - chrono::Duration::hours(6));
        let id = d_store.create(def).await.unwrap();

        let report = generator.tick_now(now).await.unwrap();
        assert_eq!(report.fired, 1, "a long-overdue definition fires exactly once per tick");

        let updated = d_store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.exec_count, 1, "missed intervals are not replayed individually");
        assert!(
            updated.next_fire.unwrap() > now,
            "next_fire advances from now, not from each missed interval"
        );
        assert_eq!(c_store.count_by_status(DelayedEventStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disables_definition_with_unparseable_cron() {
        let (generator, d_store, _c_store) = generator();
        let now = Utc::now();
        let mut def = CronDefinition::new(
            "broken", "report", "generate", "{}", "system", "0 7 * * *", "UTC", 3,
        );
        def.next_fire = Some(now - chrono::Duration::seconds(1));
        def.cron_expression = "not a cron".to_string();
        let id = d_store.create(def).await.unwrap();

        let report = generator.tick_now(now).await.unwrap();
        assert_eq!(report.disabled, 1);

        let updated = d_store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.status, CronStatus::Disabled);
        assert!(updated.last_error.is_some());
    }

    #[tokio::test]
    async fn records_an_execution_record_per_firing() {
        let (generator, d_store, _c_store) = generator();
        let now = Utc::now();
        let mut def = CronDefinition::new(
            "daily-report", "report", "generate", "{}", "system", "0 7 * * *", "UTC", 3,
        );
        def.next_fire = Some(now - chrono::Duration::seconds(1));
        let id = d_store.create(def).await.unwrap();

        generator.tick_now(now).await.unwrap();

        let records = d_store.list_executions(id, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, eventide_store::ExecutionOutcome::Success);
    }
}
