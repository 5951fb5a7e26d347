//! Tier data models: `CronDefinition` and `ExecutionRecord` (D), `DelayedEvent`
//! (C), `HotEvent` (K), and `AnalyticsRow` (columnar analytics sink).

use chrono::{DateTime, Utc};
use eventide_core::{AnalyticsRowId, CronDefinitionId, DelayedEventId, ExecutionRecordId, HotEventId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a cron definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronStatus {
    /// Eligible for firing; `next_fire` is maintained by the CronGenerator.
    Active,
    /// Temporarily suspended by an admin; bookkeeping is frozen.
    Paused,
    /// Disabled, usually because its cron expression failed to parse.
    Disabled,
    /// Reached a terminal state and will never fire again.
    Completed,
}

/// Tracks, per attribute, whether an admin has manually overridden the value
/// last loaded from the startup registry manifest. An overridden attribute
/// is never clobbered by a later manifest upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestOverrides {
    /// `event_type` was manually edited.
    pub event_type: bool,
    /// `action` was manually edited.
    pub action: bool,
    /// `default_payload` was manually edited.
    pub default_payload: bool,
    /// `cron_expression` was manually edited.
    pub cron_expression: bool,
    /// `timezone` was manually edited.
    pub timezone: bool,
}

/// A recurring schedule definition (D-tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronDefinition {
    /// Stable identity.
    pub id: CronDefinitionId,
    /// Unique human name.
    pub name: String,
    /// Event type carried into each generated `DelayedEvent`.
    pub event_type: String,
    /// Action carried into each generated `DelayedEvent`.
    pub action: String,
    /// Default payload; a manual override on the generated event wins over
    /// this class default.
    pub default_payload: String,
    /// Actor identity recorded on generated events.
    pub actor: String,
    /// The cron expression, evaluated in `timezone`.
    pub cron_expression: String,
    /// IANA timezone name the cron expression is evaluated in.
    pub timezone: String,
    /// Retry policy applied to events this definition generates.
    pub max_retries: u32,
    /// Current lifecycle status.
    pub status: CronStatus,
    /// Which attributes an admin has manually overridden.
    pub overrides: ManifestOverrides,
    /// Last time this definition actually fired.
    pub last_fire: Option<DateTime<Utc>>,
    /// Next time this definition is due to fire.
    pub next_fire: Option<DateTime<Utc>>,
    /// Count of successful firings.
    pub exec_count: u64,
    /// Count of firings that errored.
    pub error_count: u64,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last bookkeeping update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CronDefinition {
    /// Creates a new active cron definition with no fire history.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        action: impl Into<String>,
        default_payload: impl Into<String>,
        actor: impl Into<String>,
        cron_expression: impl Into<String>,
        timezone: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CronDefinitionId::new(),
            name: name.into(),
            event_type: event_type.into(),
            action: action.into(),
            default_payload: default_payload.into(),
            actor: actor.into(),
            cron_expression: cron_expression.into(),
            timezone: timezone.into(),
            max_retries,
            status: CronStatus::Active,
            overrides: ManifestOverrides::default(),
            last_fire: None,
            next_fire: None,
            exec_count: 0,
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this definition is currently eligible for firing.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CronStatus::Active && self.next_fire.is_some_and(|nf| nf <= now)
    }
}

/// Outcome recorded for a single cron firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The firing generated a C row and advanced bookkeeping.
    Success,
    /// The firing failed (e.g. cron parse failure).
    Failure,
    /// The firing was intentionally skipped.
    Skipped,
}

/// An append-only record of one cron firing (D-tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Stable identity.
    pub id: ExecutionRecordId,
    /// The definition this firing belongs to.
    pub definition_id: CronDefinitionId,
    /// The fire time this record covers.
    pub fire_time: DateTime<Utc>,
    /// The outcome of this firing.
    pub outcome: ExecutionOutcome,
    /// The C-tier event this firing generated, if any.
    pub generated_c_id: Option<DelayedEventId>,
    /// How long processing this firing took.
    pub duration_ms: Option<i64>,
    /// Error message, if `outcome == Failure`.
    pub error: Option<String>,
    /// When this record was appended.
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Builds a success record for a cron firing that generated a C row.
    #[must_use]
    pub fn success(
        definition_id: CronDefinitionId,
        fire_time: DateTime<Utc>,
        generated_c_id: DelayedEventId,
    ) -> Self {
        Self {
            id: ExecutionRecordId::new(),
            definition_id,
            fire_time,
            outcome: ExecutionOutcome::Success,
            generated_c_id: Some(generated_c_id),
            duration_ms: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Builds a failure record, e.g. when the cron expression stops parsing.
    #[must_use]
    pub fn failure(
        definition_id: CronDefinitionId,
        fire_time: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionRecordId::new(),
            definition_id,
            fire_time,
            outcome: ExecutionOutcome::Failure,
            generated_c_id: None,
            duration_ms: None,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }
}

/// Where a `DelayedEvent` or `HotEvent` originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Generated by the CronGenerator.
    Cron,
    /// Drained from a bus "delayed topic" intake adapter.
    KafkaDelayedIntake,
    /// Submitted directly via the scheduling API.
    Api,
    /// Generated internally by the engine (e.g. a Janitor re-promotion).
    System,
}

/// Lifecycle status of a `DelayedEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayedEventStatus {
    /// Eligible for promotion; the default status on insert.
    Pending,
    /// Reserved for processing (not used in the C-tier state machine today,
    /// kept to mirror the full status set named in the data model).
    Processing,
    /// Dispatched successfully.
    Completed,
    /// Terminal-errored after exhausting retries.
    Error,
    /// Skipped, e.g. fatally stale.
    Skipped,
    /// Moved to K; the row is now owned by the K-tier.
    Promoted,
}

/// A durable, one-shot delayed event awaiting promotion or direct dispatch
/// (C-tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedEvent {
    /// Stable identity; the authoritative cross-tier correlation key.
    pub id: DelayedEventId,
    /// Bus topic to publish to.
    pub topic: String,
    /// Entity type the event concerns.
    pub entity_type: String,
    /// Action performed on the entity.
    pub action: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Actor identity that requested (or generated) this event.
    pub actor: String,
    /// Opaque payload; never parsed by the engine.
    pub payload: String,
    /// Headers carried into the published message.
    pub headers: HashMap<String, String>,
    /// Wall-clock fire time.
    pub scheduled_at: DateTime<Utc>,
    /// Higher fires first on promotion ties.
    pub priority: i32,
    /// Staleness threshold; see the max-delay policy.
    pub max_delay_seconds: i64,
    /// Current status.
    pub status: DelayedEventStatus,
    /// Where this event came from.
    pub source: EventSource,
    /// Source-specific identifier (e.g. the originating `CronDefinitionId`).
    pub source_id: Option<String>,
    /// Correlation id, preserved verbatim end to end.
    pub correlation_id: String,
    /// Number of dispatch retries so far, seeded into the K value at
    /// promotion and frozen here afterwards.
    pub retry_count: u32,
    /// Maximum retries before terminal error.
    pub max_retries: u32,
    /// Whether staleness should be treated as fatal for this event.
    pub stale_is_fatal: bool,
    /// The worker node id currently processing this row, if any.
    pub node_id: Option<String>,
    /// Lock expiry, if currently locked by a worker.
    pub lock_until: Option<DateTime<Utc>>,
    /// When this row was promoted to K.
    pub promoted_at: Option<DateTime<Utc>>,
    /// The K-tier id this row was promoted into.
    pub promoted_key: Option<HotEventId>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl DelayedEvent {
    /// Whether this row is eligible for promotion at `now` given horizon
    /// `h1`.
    #[must_use]
    pub fn is_promotable(&self, now: DateTime<Utc>, h1: chrono::Duration) -> bool {
        self.status == DelayedEventStatus::Pending && self.scheduled_at <= now + h1
    }
}

/// Lifecycle status of a `HotEvent` value record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotEventStatus {
    /// Waiting in the K time-sorted index for a dispatcher claim.
    Pending,
    /// Claimed by a dispatcher under a short-TTL lock.
    Reserved,
    /// Published successfully.
    Completed,
    /// Terminal-errored after exhausting retries.
    Error,
    /// Skipped, e.g. fatally stale.
    Skipped,
}

/// A hot, near-term queue entry with a structured payload (K-tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotEvent {
    /// Stable identity.
    pub id: HotEventId,
    /// Back-reference to the originating C row; `None` for K-direct events.
    pub delayed_event_id: Option<DelayedEventId>,
    /// Bus topic to publish to.
    pub topic: String,
    /// Entity type the event concerns.
    pub entity_type: String,
    /// Action performed on the entity.
    pub action: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Actor identity.
    pub actor: String,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Headers carried into the published message.
    pub headers: HashMap<String, String>,
    /// Wall-clock fire time; also the K index score.
    pub scheduled_at: DateTime<Utc>,
    /// Carried from the source event; not part of the K score.
    pub priority: i32,
    /// Staleness threshold; see the max-delay policy.
    pub max_delay_seconds: i64,
    /// Current status.
    pub status: HotEventStatus,
    /// Where this event came from.
    pub source: EventSource,
    /// Source-specific identifier.
    pub source_id: Option<String>,
    /// Correlation id, preserved verbatim end to end.
    pub correlation_id: String,
    /// Authoritative dispatch retry count once promoted (or from creation,
    /// for K-direct events).
    pub retry_count: u32,
    /// Maximum retries before terminal error.
    pub max_retries: u32,
    /// Whether staleness should be treated as fatal for this event.
    pub stale_is_fatal: bool,
    /// The dispatcher replica holding the claim lock, if reserved.
    pub processor_id: Option<String>,
    /// When the current claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// When this row was created (used for `time_in_K_queue` on K-direct
    /// events, where there is no `promoted_at`).
    pub created_at: DateTime<Utc>,
    /// When this row was promoted from C, if it was.
    pub promoted_at: Option<DateTime<Utc>>,
    /// When this row reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl HotEvent {
    /// Whether `now` is past `scheduled_at + max_delay_seconds`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.scheduled_at + chrono::Duration::seconds(self.max_delay_seconds)
    }
}

/// Which tier produced an `AnalyticsRow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsTier {
    /// Emitted by the CronGenerator.
    Cron,
    /// Emitted by the Promoter.
    Promotion,
    /// Emitted by the Dispatcher.
    Dispatch,
}

/// The outcome of the unit of work an `AnalyticsRow` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Completed successfully.
    Success,
    /// Failed terminally.
    Failure,
    /// Did not complete within its deadline.
    Timeout,
    /// Explicitly cancelled.
    Cancelled,
    /// Will be retried.
    Retry,
}

/// Severity of an `AnalyticsRow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsLevel {
    /// Routine state transition.
    Info,
    /// Noteworthy but non-fatal (e.g. stale dispatch).
    Warning,
    /// A failure occurred.
    Error,
}

/// One append-only row per state transition, for later performance queries
/// (columnar analytics sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRow {
    /// Stable identity.
    pub id: AnalyticsRowId,
    /// Which tier/worker produced this row.
    pub tier: AnalyticsTier,
    /// The schedule or event id this row concerns, stringified.
    pub schedule_or_event_id: String,
    /// Correlation id, preserved verbatim.
    pub correlation_id: String,
    /// `topic.action` or similar human-readable event identity.
    pub event_identity: String,
    /// Originally scheduled fire time, if applicable.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When processing of this unit of work began.
    pub started_processing_at: Option<DateTime<Utc>>,
    /// When processing of this unit of work completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// The result of this unit of work.
    pub execution_result: ExecutionResult,
    /// Retry count at the time this row was appended.
    pub retry_count: u32,
    /// Time spent in the C-tier queue, in milliseconds.
    pub time_in_c_queue_ms: Option<i64>,
    /// Time spent in the K-tier queue, in milliseconds.
    pub time_in_k_queue_ms: Option<i64>,
    /// Total processing duration, in milliseconds, clamped to 0.
    pub total_duration_ms: Option<i64>,
    /// Bus topic published to, if a publish occurred.
    pub bus_topic: Option<String>,
    /// Bus partition the message landed in.
    pub bus_partition: Option<i64>,
    /// Bus offset the message landed at.
    pub bus_offset: Option<i64>,
    /// The node/replica that performed this unit of work.
    pub processing_node: Option<String>,
    /// Error message, if any.
    pub error_message: Option<String>,
    /// Severity of this row.
    pub level: AnalyticsLevel,
    /// When this row was appended.
    pub created_at: DateTime<Utc>,
}
