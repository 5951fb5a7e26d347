//! Dispatcher worker (§4.4): pops due events from K, claims each under a
//! short TTL lock, publishes to the bus, and acknowledges.

use crate::analytics::{self, DispatchRowInput};
use crate::config::EngineConfig;
use crate::error::WorkerError;
use crate::retry::{self, CircuitBreakerRegistry};
use chrono::{DateTime, Duration, Utc};
use eventide_bus::{Bus, OutboundMessage};
use eventide_core::{Classify, HotEventId};
use eventide_store::{AnalyticsStore, HotEvent, HotEventStatus, KStore};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const BUS_DEPENDENCY: &str = "bus";

/// What one `tick_now` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherReport {
    /// Events published successfully.
    pub published: usize,
    /// Events re-queued with a backoff for retry.
    pub retried: usize,
    /// Events terminal-errored after exhausting retries.
    pub errored: usize,
    /// Events skipped because they were fatally stale.
    pub skipped: usize,
    /// Candidates another replica already claimed this tick.
    pub lost_claim_race: usize,
}

/// Claims and publishes due K-tier events.
pub struct Dispatcher {
    k_store: Arc<dyn KStore>,
    bus: Arc<dyn Bus>,
    analytics_store: Arc<dyn AnalyticsStore>,
    circuit_breakers: CircuitBreakerRegistry,
    config: EngineConfig,
    node_id: String,
}

impl Dispatcher {
    /// Builds a new dispatcher identified by `node_id` for claim-lock
    /// attribution across replicas.
    #[must_use]
    pub fn new(
        k_store: Arc<dyn KStore>,
        bus: Arc<dyn Bus>,
        analytics_store: Arc<dyn AnalyticsStore>,
        circuit_breakers: CircuitBreakerRegistry,
        config: EngineConfig,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            k_store,
            bus,
            analytics_store,
            circuit_breakers,
            config,
            node_id: node_id.into(),
        }
    }

    /// Runs one tick immediately, bypassing the timer. Candidates are
    /// processed in the score order returned by the index scan, so within
    /// this call two events with distinct scores are always published in
    /// ascending-score order (§8 property 5).
    #[instrument(skip(self), fields(worker = "dispatcher", node = %self.node_id))]
    pub async fn tick_now(&self, now: DateTime<Utc>) -> Result<DispatcherReport, WorkerError> {
        let ids = self
            .k_store
            .index_range_by_score(now, self.config.dispatch_batch)
            .await?;

        let mut report = DispatcherReport::default();
        for id in ids {
            match self.dispatch_one(id, now).await {
                Ok(DispatchOutcome::Published) => report.published += 1,
                Ok(DispatchOutcome::Retried) => report.retried += 1,
                Ok(DispatchOutcome::Errored) => report.errored += 1,
                Ok(DispatchOutcome::Skipped) => report.skipped += 1,
                Ok(DispatchOutcome::LostClaimRace) => report.lost_claim_race += 1,
                Err(e) => {
                    warn!(event = %id, error = %e, "dispatch failed unexpectedly");
                    report.errored += 1;
                }
            }
        }
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        id: HotEventId,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, WorkerError> {
        let ttl = Duration::seconds(self.config.claim_ttl_l_seconds);
        if !self.k_store.try_lock(id, &self.node_id, now, ttl).await? {
            return Ok(DispatchOutcome::LostClaimRace);
        }

        let Some(event) = self.k_store.get_value(id).await? else {
            return Ok(DispatchOutcome::LostClaimRace);
        };

        if event.is_stale(now) && event.stale_is_fatal {
            self.skip_stale(&event, now).await?;
            return Ok(DispatchOutcome::Skipped);
        }

        let breaker = self.circuit_breakers.get(BUS_DEPENDENCY);
        if !breaker.allow(now) {
            let mut reopened = event.clone();
            reopened.status = HotEventStatus::Pending;
            self.k_store.set_value(reopened).await?;
            self.k_store.unlock(id, &self.node_id).await?;
            return Err(WorkerError::CircuitOpen {
                dependency: BUS_DEPENDENCY.to_string(),
            });
        }

        let stale = event.is_stale(now);
        let message = self.build_message(&event, stale);

        match self.bus.publish(message).await {
            Ok(receipt) => {
                breaker.record_success();
                self.complete(&event, now, receipt.partition, receipt.offset, stale)
                    .await?;
                Ok(DispatchOutcome::Published)
            }
            Err(e) => {
                breaker.record_failure(now);
                self.handle_publish_failure(&event, now, &e).await
            }
        }
    }

    fn build_message(&self, event: &HotEvent, stale: bool) -> OutboundMessage {
        let mut headers = event.headers.clone();
        headers.insert("x-correlation-id".to_string(), event.correlation_id.clone());
        headers.insert(
            "x-source".to_string(),
            format!("{:?}", event.source).to_lowercase(),
        );
        if let Some(source_id) = &event.source_id {
            headers.insert("x-source-id".to_string(), source_id.clone());
        }
        if stale {
            headers.insert("stale".to_string(), "true".to_string());
        }
        OutboundMessage {
            topic: event.topic.clone(),
            payload: event.payload.clone(),
            headers,
        }
    }

    async fn complete(
        &self,
        event: &HotEvent,
        now: DateTime<Utc>,
        bus_partition: i64,
        bus_offset: i64,
        stale: bool,
    ) -> Result<(), WorkerError> {
        let mut completed = event.clone();
        completed.status = HotEventStatus::Completed;
        completed.completed_at = Some(now);
        self.k_store.set_value(completed).await?;
        self.k_store.unlock(event.id, &self.node_id).await?;

        let queue_entered_at = event.promoted_at.unwrap_or(event.created_at);
        let row = analytics::dispatch_row(DispatchRowInput {
            event_id: event.id.to_string(),
            correlation_id: event.correlation_id.clone(),
            event_identity: format!("{}.{}", event.topic, event.action),
            scheduled_at: event.scheduled_at,
            k_queue_entered_at: queue_entered_at,
            started_processing_at: now,
            completed_at: now,
            retry_count: event.retry_count,
            result: eventide_store::ExecutionResult::Success,
            level: if stale {
                eventide_store::AnalyticsLevel::Warning
            } else {
                eventide_store::AnalyticsLevel::Info
            },
            bus_topic: Some(event.topic.clone()),
            bus_partition: Some(bus_partition),
            bus_offset: Some(bus_offset),
            processing_node: Some(self.node_id.clone()),
            error_message: None,
        });
        if let Err(e) = self.analytics_store.append(row).await {
            warn!(event = %event.id, error = %e, "failed to append dispatch analytics row");
        }

        debug!(event = %event.id, "published");
        Ok(())
    }

    async fn skip_stale(&self, event: &HotEvent, now: DateTime<Utc>) -> Result<(), WorkerError> {
        let mut skipped = event.clone();
        skipped.status = HotEventStatus::Skipped;
        skipped.completed_at = Some(now);
        self.k_store.set_value(skipped).await?;
        self.k_store.unlock(event.id, &self.node_id).await?;

        let queue_entered_at = event.promoted_at.unwrap_or(event.created_at);
        let row = analytics::dispatch_row(DispatchRowInput {
            event_id: event.id.to_string(),
            correlation_id: event.correlation_id.clone(),
            event_identity: format!("{}.{}", event.topic, event.action),
            scheduled_at: event.scheduled_at,
            k_queue_entered_at: queue_entered_at,
            started_processing_at: now,
            completed_at: now,
            retry_count: event.retry_count,
            result: eventide_store::ExecutionResult::Cancelled,
            level: eventide_store::AnalyticsLevel::Warning,
            bus_topic: None,
            bus_partition: None,
            bus_offset: None,
            processing_node: Some(self.node_id.clone()),
            error_message: Some("skipped: fatally stale".to_string()),
        });
        if let Err(e) = self.analytics_store.append(row).await {
            warn!(event = %event.id, error = %e, "failed to append skip analytics row");
        }
        warn!(event = %event.id, "skipped fatally stale event");
        Ok(())
    }

    async fn handle_publish_failure(
        &self,
        event: &HotEvent,
        now: DateTime<Utc>,
        error: &eventide_bus::BusError,
    ) -> Result<DispatchOutcome, WorkerError> {
        let retry_count = event.retry_count + 1;

        if retry_count <= event.max_retries {
            let delay = retry::backoff_for(error.classify(), retry_count, &self.config);
            let mut retried = event.clone();
            retried.retry_count = retry_count;
            retried.status = HotEventStatus::Pending;
            retried.scheduled_at = now + delay;
            self.k_store.set_value(retried).await?;
            self.k_store.unlock(event.id, &self.node_id).await?;
            warn!(event = %event.id, retry_count, delay_ms = delay.num_milliseconds(), error = %error, "publish failed, retry scheduled");
            Ok(DispatchOutcome::Retried)
        } else {
            let mut errored = event.clone();
            errored.retry_count = retry_count;
            errored.status = HotEventStatus::Error;
            errored.completed_at = Some(now);
            self.k_store.set_value(errored).await?;
            self.k_store.unlock(event.id, &self.node_id).await?;

            let queue_entered_at = event.promoted_at.unwrap_or(event.created_at);
            let row = analytics::dispatch_row(DispatchRowInput {
                event_id: event.id.to_string(),
                correlation_id: event.correlation_id.clone(),
                event_identity: format!("{}.{}", event.topic, event.action),
                scheduled_at: event.scheduled_at,
                k_queue_entered_at: queue_entered_at,
                started_processing_at: now,
                completed_at: now,
                retry_count,
                result: eventide_store::ExecutionResult::Failure,
                level: eventide_store::AnalyticsLevel::Error,
                bus_topic: Some(event.topic.clone()),
                bus_partition: None,
                bus_offset: None,
                processing_node: Some(self.node_id.clone()),
                error_message: Some(error.to_string()),
            });
            if let Err(e) = self.analytics_store.append(row).await {
                warn!(event = %event.id, error = %e, "failed to append error analytics row");
            }
            warn!(event = %event.id, error = %error, "event terminal-errored after exhausting retries");
            Ok(DispatchOutcome::Errored)
        }
    }
}

enum DispatchOutcome {
    Published,
    Retried,
    Errored,
    Skipped,
    LostClaimRace,
}
