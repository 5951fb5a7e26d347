//! Scheduling API (§4.1): the engine surface producers call to schedule a
//! one-shot event or a recurring cron definition, or to cancel a pending one.

use crate::config::EngineConfig;
use crate::error::SchedulingError;
use crate::schedule::CronSchedule;
use chrono::{DateTime, Duration, Utc};
use eventide_core::{CronDefinitionId, DelayedEventId, HotEventId};
use eventide_store::{
    CStore, CronDefinition, DStore, DelayedEvent, DelayedEventStatus, EventSource, HotEvent,
    HotEventStatus, KStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use ulid::Ulid;

/// How much a `scheduled_at` may lag `now` before `ScheduleEvent` rejects it
/// as being in the past. Small enough to tolerate clock skew between the
/// caller and the engine, not so large that typos pass silently.
const PAST_SKEW_TOLERANCE: Duration = Duration::seconds(5);

/// Which tier a scheduled event landed in, carrying its tier-native id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Inserted directly into K because it is within the promotion horizon.
    Direct(HotEventId),
    /// Inserted into C, pending promotion.
    Queued(DelayedEventId),
}

/// Arguments to `schedule_event`, grouped since the scheduling API takes more
/// fields than fit comfortably as positional parameters.
#[derive(Debug, Clone)]
pub struct ScheduleEventRequest {
    pub topic: String,
    pub entity_type: String,
    pub action: String,
    pub entity_id: String,
    pub actor: String,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub headers: HashMap<String, String>,
    pub priority: i32,
    pub max_retries: u32,
    pub max_delay_seconds: Option<i64>,
    pub stale_is_fatal: Option<bool>,
    pub correlation_id: Option<String>,
    pub source: EventSource,
    pub source_id: Option<String>,
}

/// Schedules a one-shot event, choosing the tier per §4.1's horizon rule.
///
/// # Errors
///
/// Returns `SchedulingError::InvalidArgument` if `scheduled_at` is further in
/// the past than the tolerated clock skew, or if `topic` is empty.
pub async fn schedule_event(
    c_store: &Arc<dyn CStore>,
    k_store: &Arc<dyn KStore>,
    config: &EngineConfig,
    now: DateTime<Utc>,
    request: ScheduleEventRequest,
) -> Result<ScheduleOutcome, SchedulingError> {
    if request.topic.is_empty() {
        return Err(SchedulingError::InvalidArgument {
            message: "topic must not be empty".to_string(),
        });
    }
    if request.scheduled_at < now - PAST_SKEW_TOLERANCE {
        return Err(SchedulingError::InvalidArgument {
            message: format!(
                "scheduled_at {} is too far in the past (now {now})",
                request.scheduled_at
            ),
        });
    }

    let correlation_id = request
        .correlation_id
        .unwrap_or_else(|| Ulid::new().to_string());
    let max_delay_seconds = request
        .max_delay_seconds
        .unwrap_or(config.max_delay_default_seconds);
    let stale_is_fatal = request.stale_is_fatal.unwrap_or(config.stale_is_fatal);
    let h1 = Duration::seconds(config.promotion_horizon_h1_seconds);

    if request.scheduled_at - now <= h1 {
        let event = HotEvent {
            id: HotEventId::new(),
            delayed_event_id: None,
            topic: request.topic,
            entity_type: request.entity_type,
            action: request.action,
            entity_id: request.entity_id,
            actor: request.actor,
            payload: request.payload,
            headers: request.headers,
            scheduled_at: request.scheduled_at,
            priority: request.priority,
            max_delay_seconds,
            status: HotEventStatus::Pending,
            source: request.source,
            source_id: request.source_id,
            correlation_id,
            retry_count: 0,
            max_retries: request.max_retries,
            stale_is_fatal,
            processor_id: None,
            claimed_at: None,
            created_at: now,
            promoted_at: None,
            completed_at: None,
        };
        let id = event.id;
        k_store.set_value(event).await?;
        Ok(ScheduleOutcome::Direct(id))
    } else {
        let event = DelayedEvent {
            id: DelayedEventId::new(),
            topic: request.topic,
            entity_type: request.entity_type,
            action: request.action,
            entity_id: request.entity_id,
            actor: request.actor,
            payload: request.payload.to_string(),
            headers: request.headers,
            scheduled_at: request.scheduled_at,
            priority: request.priority,
            max_delay_seconds,
            status: DelayedEventStatus::Pending,
            source: request.source,
            source_id: request.source_id,
            correlation_id,
            retry_count: 0,
            max_retries: request.max_retries,
            stale_is_fatal,
            node_id: None,
            lock_until: None,
            promoted_at: None,
            promoted_key: None,
            created_at: now,
            updated_at: now,
        };
        let id = c_store.insert(event).await?;
        Ok(ScheduleOutcome::Queued(id))
    }
}

/// Arguments to `schedule_cron_definition`.
#[derive(Debug, Clone)]
pub struct ScheduleCronDefinitionRequest {
    pub name: String,
    pub event_type: String,
    pub action: String,
    pub default_payload: String,
    pub actor: String,
    pub cron_expression: String,
    pub timezone: String,
    pub max_retries: u32,
}

/// Registers a new recurring cron definition, computing its first `next_fire`
/// immediately on success.
///
/// # Errors
///
/// Returns `Duplicate` on name collision, `InvalidCron` if the expression
/// does not parse, or `UnknownTimezone` if the timezone does not resolve.
pub async fn schedule_cron_definition(
    d_store: &Arc<dyn DStore>,
    now: DateTime<Utc>,
    request: ScheduleCronDefinitionRequest,
) -> Result<CronDefinitionId, SchedulingError> {
    if d_store.find(&request.name).await?.is_some() {
        return Err(SchedulingError::Duplicate { name: request.name });
    }

    let schedule = CronSchedule::parse(&request.cron_expression, &request.timezone)?;

    let mut definition = CronDefinition::new(
        request.name,
        request.event_type,
        request.action,
        request.default_payload,
        request.actor,
        request.cron_expression,
        request.timezone,
        request.max_retries,
    );
    definition.next_fire = schedule.next_after(now);

    d_store.create(definition).await.map_err(Into::into)
}

/// Removes an event from its tier if still pending.
///
/// # Errors
///
/// Returns `Conflict` if the event is no longer pending (already processing
/// or terminal).
pub async fn cancel_event(
    c_store: &Arc<dyn CStore>,
    k_store: &Arc<dyn KStore>,
    id: ScheduleOutcome,
) -> Result<bool, SchedulingError> {
    match id {
        ScheduleOutcome::Direct(hot_id) => match k_store.get_value(hot_id).await? {
            None => Ok(false),
            Some(event) if event.status == HotEventStatus::Pending => {
                k_store.delete_value(hot_id).await?;
                Ok(true)
            }
            Some(_) => Err(SchedulingError::Conflict {
                message: format!("{hot_id} is no longer pending"),
            }),
        },
        ScheduleOutcome::Queued(delayed_id) => match c_store.get(delayed_id).await? {
            None => Ok(false),
            Some(event) if event.status == DelayedEventStatus::Pending => {
                c_store
                    .mutate(
                        delayed_id,
                        eventide_store::DelayedEventPatch {
                            expected_status: Some(DelayedEventStatus::Pending),
                            status: Some(DelayedEventStatus::Skipped),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(true)
            }
            Some(_) => Err(SchedulingError::Conflict {
                message: format!("{delayed_id} is no longer pending"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventide_store::{InMemoryCStore, InMemoryDStore, InMemoryKStore};

    fn sample_request(scheduled_at: DateTime<Utc>) -> ScheduleEventRequest {
        ScheduleEventRequest {
            topic: "orders.created".into(),
            entity_type: "order".into(),
            action: "create".into(),
            entity_id: "1".into(),
            actor: "system".into(),
            payload: serde_json::json!({}),
            scheduled_at,
            headers: HashMap::new(),
            priority: 0,
            max_retries: 3,
            max_delay_seconds: None,
            stale_is_fatal: None,
            correlation_id: None,
            source: EventSource::Api,
            source_id: None,
        }
    }

    #[tokio::test]
    async fn within_horizon_goes_direct_to_k() {
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let k_store: Arc<dyn KStore> = Arc::new(InMemoryKStore::new());
        let config = EngineConfig::default();
        let now = Utc::now();

        let outcome = schedule_event(
            &c_store,
            &k_store,
            &config,
            now,
            sample_request(now + Duration::seconds(5)),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ScheduleOutcome::Direct(_)));
        assert_eq!(c_store.count_by_status(DelayedEventStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn beyond_horizon_queues_in_c() {
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let k_store: Arc<dyn KStore> = Arc::new(InMemoryKStore::new());
        let config = EngineConfig::default();
        let now = Utc::now();

        let outcome = schedule_event(
            &c_store,
            &k_store,
            &config,
            now,
            sample_request(now + Duration::hours(2)),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ScheduleOutcome::Queued(_)));
    }

    #[tokio::test]
    async fn rejects_scheduling_far_in_the_past() {
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let k_store: Arc<dyn KStore> = Arc::new(InMemoryKStore::new());
        let config = EngineConfig::default();
        let now = Utc::now();

        let err = schedule_event(
            &c_store,
            &k_store,
            &config,
            now,
            sample_request(now - Duration::minutes(5)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn cancel_conflicts_on_non_pending_direct_event() {
        let c_store: Arc<dyn CStore> = Arc::new(InMemoryCStore::new());
        let k_store: Arc<dyn KStore> = Arc::new(InMemoryKStore::new());
        let config = EngineConfig::default();
        let now = Utc::now();

        let outcome = schedule_event(&c_store, &k_store, &config, now, sample_request(now + Duration::seconds(5)))
            .await
            .unwrap();
        let ScheduleOutcome::Direct(id) = outcome else {
            panic!("expected direct outcome");
        };
        k_store
            .cas_value_status(id, HotEventStatus::Pending, HotEventStatus::Reserved)
            .await
            .unwrap();

        let err = cancel_event(&c_store, &k_store, ScheduleOutcome::Direct(id))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Conflict { .. }));
    }

    #[tokio::test]
    async fn schedule_cron_definition_rejects_duplicate_name() {
        let d_store: Arc<dyn DStore> = Arc::new(InMemoryDStore::new());
        let now = Utc::now();
        let request = ScheduleCronDefinitionRequest {
            name: "daily-report".into(),
            event_type: "report".into(),
            action: "generate".into(),
            default_payload: "{}".into(),
            actor: "system".into(),
            cron_expression: "0 7 * * *".into(),
            timezone: "UTC".into(),
            max_retries: 3,
        };
        schedule_cron_definition(&d_store, now, request.clone())
            .await
            .unwrap();

        let err = schedule_cron_definition(&d_store, now, request)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Duplicate { .. }));
    }
}
