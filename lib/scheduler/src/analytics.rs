//! Analytics row construction: one append-only row per state transition,
//! with the queue-duration computations from §4.7.

use chrono::{DateTime, Utc};
use eventide_core::AnalyticsRowId;
use eventide_store::{AnalyticsLevel, AnalyticsRow, AnalyticsTier, ExecutionResult};

fn clamp_ms(duration: chrono::Duration) -> i64 {
    duration.num_milliseconds().max(0)
}

/// Builds the AnalyticsRow for a cron firing.
#[must_use]
pub fn cron_row(
    definition_id: impl ToString,
    correlation_id: impl Into<String>,
    event_identity: impl Into<String>,
    fire_time: DateTime<Utc>,
    result: ExecutionResult,
    level: AnalyticsLevel,
    error_message: Option<String>,
) -> AnalyticsRow {
    AnalyticsRow {
        id: AnalyticsRowId::new(),
        tier: AnalyticsTier::Cron,
        schedule_or_event_id: definition_id.to_string(),
        correlation_id: correlation_id.into(),
        event_identity: event_identity.into(),
        scheduled_at: Some(fire_time),
        started_processing_at: None,
        completed_at: None,
        execution_result: result,
        retry_count: 0,
        time_in_c_queue_ms: None,
        time_in_k_queue_ms: None,
        total_duration_ms: None,
        bus_topic: None,
        bus_partition: None,
        bus_offset: None,
        processing_node: None,
        error_message,
        level,
        created_at: Utc::now(),
    }
}

/// Builds the AnalyticsRow for a C-to-K promotion.
///
/// `time_in_c_queue = promoted_at - created_at`.
#[must_use]
pub fn promotion_row(
    event_id: impl ToString,
    correlation_id: impl Into<String>,
    event_identity: impl Into<String>,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    promoted_at: DateTime<Utc>,
) -> AnalyticsRow {
    AnalyticsRow {
        id: AnalyticsRowId::new(),
        tier: AnalyticsTier::Promotion,
        schedule_or_event_id: event_id.to_string(),
        correlation_id: correlation_id.into(),
        event_identity: event_identity.into(),
        scheduled_at: Some(scheduled_at),
        started_processing_at: Some(promoted_at),
        completed_at: None,
        execution_result: ExecutionResult::Success,
        retry_count: 0,
        time_in_c_queue_ms: Some(clamp_ms(promoted_at - created_at)),
        time_in_k_queue_ms: None,
        total_duration_ms: None,
        bus_topic: None,
        bus_partition: None,
        bus_offset: None,
        processing_node: None,
        error_message: None,
        level: AnalyticsLevel::Info,
        created_at: Utc::now(),
    }
}

/// Input to `dispatch_row`, gathered from the `HotEvent` plus the publish
/// outcome; kept as a struct rather than a long parameter list since the
/// Dispatcher has every field in hand at the call site anyway.
pub struct DispatchRowInput {
    pub event_id: String,
    pub correlation_id: String,
    pub event_identity: String,
    pub scheduled_at: DateTime<Utc>,
    /// `promoted_at` for a promoted event, `created_at` for a K-direct one.
    pub k_queue_entered_at: DateTime<Utc>,
    pub started_processing_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub result: ExecutionResult,
    pub level: AnalyticsLevel,
    pub bus_topic: Option<String>,
    pub bus_partition: Option<i64>,
    pub bus_offset: Option<i64>,
    pub processing_node: Option<String>,
    pub error_message: Option<String>,
}

/// Builds the AnalyticsRow for a dispatch attempt (success, failure, skip,
/// or stale warning).
///
/// `time_in_k_queue = started_processing_at - k_queue_entered_at`,
/// `total = completed_at - scheduled_at`, both clamped to 0.
#[must_use]
pub fn dispatch_row(input: DispatchRowInput) -> AnalyticsRow {
    AnalyticsRow {
        id: AnalyticsRowId::new(),
        tier: AnalyticsTier::Dispatch,
        schedule_or_event_id: input.event_id,
        correlation_id: input.correlation_id,
        event_identity: input.event_identity,
        scheduled_at: Some(input.scheduled_at),
        started_processing_at: Some(input.started_processing_at),
        completed_at: Some(input.completed_at),
        execution_result: input.result,
        retry_count: input.retry_count,
        time_in_c_queue_ms: None,
        time_in_k_queue_ms: Some(clamp_ms(
            input.started_processing_at - input.k_queue_entered_at,
        )),
        total_duration_ms: Some(clamp_ms(input.completed_at - input.scheduled_at)),
        bus_topic: input.bus_topic,
        bus_partition: input.bus_partition,
        bus_offset: input.bus_offset,
        processing_node: input.processing_node,
        error_message: input.error_message,
        level: input.level,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_row_computes_c_queue_duration() {
        let created_at = Utc::now() - chrono::Duration::hours(1);
        let promoted_at = Utc::now();
        let row = promotion_row(
            "evt-1",
            "corr-1",
            "orders.created",
            promoted_at + chrono::Duration::minutes(30),
            created_at,
            promoted_at,
        );
        assert_eq!(
            row.time_in_c_queue_ms,
            Some((promoted_at - created_at).num_milliseconds())
        );
    }

    #[test]
    fn dispatch_row_clamps_negative_total_duration_to_zero() {
        let now = Utc::now();
        let row = dispatch_row(DispatchRowInput {
            event_id: "evt-1".into(),
            correlation_id: "corr-1".into(),
            event_identity: "orders.created".into(),
            scheduled_at: now + chrono::Duration::seconds(5), // fired early
            k_queue_entered_at: now,
            started_processing_at: now,
            completed_at: now,
            retry_count: 0,
            result: ExecutionResult::Success,
            level: AnalyticsLevel::Info,
            bus_topic: Some("orders.created".into()),
            bus_partition: Some(0),
            bus_offset: Some(42),
            processing_node: Some("node-a".into()),
            error_message: None,
        });
        assert_eq!(row.total_duration_ms, Some(0));
    }
}
