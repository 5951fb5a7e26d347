//! Engine configuration, loaded with the `config` crate layering defaults,
//! an optional file, and `EVENTIDE__`-prefixed environment variables.

use serde::{Deserialize, Serialize};

fn default_cron_tick_seconds() -> u64 {
    60
}
fn default_promote_tick_seconds() -> u64 {
    30
}
fn default_dispatch_tick_seconds() -> u64 {
    1
}
fn default_janitor_tick_seconds() -> u64 {
    60
}
fn default_dispatch_batch() -> usize {
    100
}
fn default_promote_batch() -> usize {
    1_000
}
fn default_cron_batch() -> usize {
    100
}
fn default_promotion_horizon_h1_seconds() -> i64 {
    3_600
}
fn default_claim_ttl_l_seconds() -> i64 {
    30
}
fn default_retention_c_days() -> i64 {
    30
}
fn default_retention_analytics_days() -> i64 {
    90
}
fn default_max_delay_default_seconds() -> i64 {
    86_400
}
fn default_k_value_ttl_buffer_seconds() -> i64 {
    7_200
}
fn default_k_completed_ttl_seconds() -> i64 {
    3_600
}
fn default_stale_is_fatal() -> bool {
    false
}
fn default_retry_base_ms() -> u64 {
    60_000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_max_ms() -> u64 {
    3_600_000
}
fn default_retry_jitter() -> bool {
    true
}
fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}
fn default_circuit_breaker_cooldown_seconds() -> u64 {
    60
}
fn default_janitor_index_grace_seconds() -> i64 {
    300
}
fn default_queue_health_overdue_threshold() -> i64 {
    10
}
fn default_bus_publish_timeout_ms() -> u64 {
    20_000 // < claim_ttl_l's default of 30 s, per §10.3
}
fn default_bus_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}
fn default_health_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// The full configuration surface for an `Engine`, per the enumerated
/// settings list. Every field has a default matching the value named there;
/// `janitor_stuck_claim_grace_seconds` is the one field whose default is
/// computed from another (`claim_ttl_l`) rather than a literal, so it is
/// populated in `Default` rather than via `#[serde(default = "fn")]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(default = "default_cron_tick_seconds")]
    pub cron_tick_seconds: u64,
    #[serde(default = "default_promote_tick_seconds")]
    pub promote_tick_seconds: u64,
    #[serde(default = "default_dispatch_tick_seconds")]
    pub dispatch_tick_seconds: u64,
    #[serde(default = "default_janitor_tick_seconds")]
    pub janitor_tick_seconds: u64,

    #[serde(default = "default_dispatch_batch")]
    pub dispatch_batch: usize,
    #[serde(default = "default_promote_batch")]
    pub promote_batch: usize,
    #[serde(default = "default_cron_batch")]
    pub cron_batch: usize,

    #[serde(default = "default_promotion_horizon_h1_seconds")]
    pub promotion_horizon_h1_seconds: i64,
    #[serde(default = "default_claim_ttl_l_seconds")]
    pub claim_ttl_l_seconds: i64,
    #[serde(default = "default_retention_c_days")]
    pub retention_c_days: i64,
    #[serde(default = "default_retention_analytics_days")]
    pub retention_analytics_days: i64,
    #[serde(default = "default_max_delay_default_seconds")]
    pub max_delay_default_seconds: i64,
    #[serde(default = "default_k_value_ttl_buffer_seconds")]
    pub k_value_ttl_buffer_seconds: i64,
    #[serde(default = "default_k_completed_ttl_seconds")]
    pub k_completed_ttl_seconds: i64,

    #[serde(default = "default_stale_is_fatal")]
    pub stale_is_fatal: bool,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: bool,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,

    /// Defaults to `claim_ttl_l_seconds` if absent; see `Default` below.
    pub janitor_stuck_claim_grace_seconds: i64,
    #[serde(default = "default_janitor_index_grace_seconds")]
    pub janitor_index_grace_seconds: i64,
    #[serde(default = "default_queue_health_overdue_threshold")]
    pub queue_health_overdue_threshold: i64,

    #[serde(default = "default_bus_publish_timeout_ms")]
    pub bus_publish_timeout_ms: u64,
    #[serde(default = "default_bus_url")]
    pub bus_url: String,

    #[serde(default = "default_health_bind_addr")]
    pub health_bind_addr: String,

    /// Absent means no manifest load at startup, an empty registry.
    #[serde(default)]
    pub event_registry_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cron_tick_seconds: default_cron_tick_seconds(),
            promote_tick_seconds: default_promote_tick_seconds(),
            dispatch_tick_seconds: default_dispatch_tick_seconds(),
            janitor_tick_seconds: default_janitor_tick_seconds(),
            dispatch_batch: default_dispatch_batch(),
            promote_batch: default_promote_batch(),
            cron_batch: default_cron_batch(),
            promotion_horizon_h1_seconds: default_promotion_horizon_h1_seconds(),
            claim_ttl_l_seconds: default_claim_ttl_l_seconds(),
            retention_c_days: default_retention_c_days(),
            retention_analytics_days: default_retention_analytics_days(),
            max_delay_default_seconds: default_max_delay_default_seconds(),
            k_value_ttl_buffer_seconds: default_k_value_ttl_buffer_seconds(),
            k_completed_ttl_seconds: default_k_completed_ttl_seconds(),
            stale_is_fatal: default_stale_is_fatal(),
            retry_base_ms: default_retry_base_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_ms: default_retry_max_ms(),
            retry_jitter: default_retry_jitter(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failure_threshold(),
            circuit_breaker_cooldown_seconds: default_circuit_breaker_cooldown_seconds(),
            janitor_stuck_claim_grace_seconds: default_claim_ttl_l_seconds(),
            janitor_index_grace_seconds: default_janitor_index_grace_seconds(),
            queue_health_overdue_threshold: default_queue_health_overdue_threshold(),
            bus_publish_timeout_ms: default_bus_publish_timeout_ms(),
            bus_url: default_bus_url(),
            health_bind_addr: default_health_bind_addr(),
            event_registry_path: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from defaults, an optional `eventide.toml` in the
    /// working directory, and `EVENTIDE__`-prefixed environment variables
    /// (`__` as the nesting separator).
    ///
    /// # Errors
    ///
    /// Returns an error if the file (when present) or environment fail to
    /// parse, or if deserialization into `EngineConfig` fails.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("cron_tick_seconds", defaults.cron_tick_seconds)?
            .set_default("promote_tick_seconds", defaults.promote_tick_seconds)?
            .set_default("dispatch_tick_seconds", defaults.dispatch_tick_seconds)?
            .set_default("janitor_tick_seconds", defaults.janitor_tick_seconds)?
            .set_default("dispatch_batch", defaults.dispatch_batch as i64)?
            .set_default("promote_batch", defaults.promote_batch as i64)?
            .set_default("cron_batch", defaults.cron_batch as i64)?
            .set_default(
                "promotion_horizon_h1_seconds",
                defaults.promotion_horizon_h1_seconds,
            )?
            .set_default("claim_ttl_l_seconds", defaults.claim_ttl_l_seconds)?
            .set_default("retention_c_days", defaults.retention_c_days)?
            .set_default(
                "retention_analytics_days",
                defaults.retention_analytics_days,
            )?
            .set_default(
                "max_delay_default_seconds",
                defaults.max_delay_default_seconds,
            )?
            .set_default(
                "k_value_ttl_buffer_seconds",
                defaults.k_value_ttl_buffer_seconds,
            )?
            .set_default(
                "k_completed_ttl_seconds",
                defaults.k_completed_ttl_seconds,
            )?
            .set_default("stale_is_fatal", defaults.stale_is_fatal)?
            .set_default("retry_base_ms", defaults.retry_base_ms)?
            .set_default("retry_multiplier", defaults.retry_multiplier)?
            .set_default("retry_max_ms", defaults.retry_max_ms)?
            .set_default("retry_jitter", defaults.retry_jitter)?
            .set_default(
                "circuit_breaker_failure_threshold",
                defaults.circuit_breaker_failure_threshold,
            )?
            .set_default(
                "circuit_breaker_cooldown_seconds",
                defaults.circuit_breaker_cooldown_seconds,
            )?
            .set_default(
                "janitor_stuck_claim_grace_seconds",
                defaults.janitor_stuck_claim_grace_seconds,
            )?
            .set_default(
                "janitor_index_grace_seconds",
                defaults.janitor_index_grace_seconds,
            )?
            .set_default(
                "queue_health_overdue_threshold",
                defaults.queue_health_overdue_threshold,
            )?
            .set_default("bus_publish_timeout_ms", defaults.bus_publish_timeout_ms)?
            .set_default("bus_url", defaults.bus_url)?
            .set_default("health_bind_addr", defaults.health_bind_addr)?
            .add_source(config::File::with_name("eventide").required(false))
            .add_source(
                config::Environment::with_prefix("EVENTIDE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
