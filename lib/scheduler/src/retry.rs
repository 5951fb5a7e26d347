//! Classification-driven retry policy and per-dependency circuit breakers.

use crate::config::EngineConfig;
use chrono::{DateTime, Duration, Utc};
use eventide_core::ErrorClass;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Computes the backoff delay for a dispatch retry attempt, per §7's
/// classification-driven retry table.
///
/// `attempt` is the retry-count *after* the failure that triggered this
/// backoff (i.e. 1 for the first retry).
#[must_use]
pub fn backoff_for(class: ErrorClass, attempt: u32, config: &EngineConfig) -> Duration {
    if !class.is_backed_off() {
        return Duration::zero();
    }

    let base = match class {
        ErrorClass::Timeout => config.retry_base_ms as f64 / 2.0,
        _ => config.retry_base_ms as f64,
    };
    let multiplier = match class {
        ErrorClass::Timeout => 1.0, // linear backoff for timeouts
        _ => config.retry_multiplier,
    };

    let raw_ms = if matches!(class, ErrorClass::Timeout) {
        base * f64::from(attempt)
    } else {
        base * multiplier.powi((attempt.max(1) - 1) as i32)
    };
    let capped_ms = raw_ms.min(config.retry_max_ms as f64);

    let jittered_ms = if config.retry_jitter {
        let mut rng = rand::thread_rng();
        capped_ms + rng.gen_range(0.0..=(capped_ms * 0.1))
    } else {
        capped_ms
    };

    Duration::milliseconds(jittered_ms.round_to_i64())
}

/// Rounds a `f64` millisecond value to `i64` without pulling in a helper
/// crate for a single cast.
trait RoundToI64 {
    fn round_to_i64(self) -> i64;
}

impl RoundToI64 for f64 {
    fn round_to_i64(self) -> i64 {
        self.round() as i64
    }
}

/// State of a circuit breaker for one external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls fail fast without attempting the dependency.
    Open,
    /// One trial call is allowed through to probe recovery.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
        }
    }
}

/// A circuit breaker guarding one external dependency (a store or the bus).
/// Default threshold 5 consecutive failures, default cooldown 60 s, matching
/// the original implementation's defaults.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given threshold and cooldown.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown_seconds: u64) -> Self {
        Self {
            failure_threshold,
            cooldown: Duration::seconds(cooldown_seconds as i64),
            state: RwLock::new(BreakerState::new()),
        }
    }

    /// Whether a call should be allowed through right now. A half-open probe
    /// consumes itself: the first caller after cooldown sees `HalfOpen` and
    /// is allowed; subsequent callers are blocked until that probe resolves.
    #[must_use]
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.write().unwrap();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure_at
                    .is_none_or(|last| now - last >= self.cooldown);
                if cooled_down {
                    state.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call. Closes the breaker unconditionally (a
    /// single success during `HalfOpen` closes it, per §7).
    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
    }

    /// Records a failed call, opening the breaker once the threshold is hit.
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        state.failure_count += 1;
        state.last_failure_at = Some(now);
        if state.state == CircuitState::HalfOpen || state.failure_count >= self.failure_threshold {
            state.state = CircuitState::Open;
        }
    }

    /// Current state, for the health/stats surface.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.read().unwrap().state
    }
}

/// A named registry of circuit breakers, one per external dependency
/// (`"d_store"`, `"c_store"`, `"k_store"`, `"bus"`, ...), created lazily on
/// first use with a per-key `Arc<RwLock<HashMap<...>>>` registry.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    cooldown_seconds: u64,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry using the given failure threshold and cooldown for
    /// every breaker it creates.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown_seconds: u64) -> Self {
        Self {
            failure_threshold,
            cooldown_seconds,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the breaker for `dependency`, creating it if absent.
    #[must_use]
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(dependency) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().unwrap();
        Arc::clone(
            breakers
                .entry(dependency.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.failure_threshold, self.cooldown_seconds))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, 60);
        let now = Utc::now();
        assert!(breaker.allow(now));

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow(now));
    }

    #[test]
    fn breaker_half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, 60);
        let now = Utc::now();
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Open);

        let after_cooldown = now + Duration::seconds(61);
        assert!(breaker.allow(after_cooldown));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_returns_the_same_breaker_for_a_key() {
        let registry = CircuitBreakerRegistry::new(5, 60);
        let a = registry.get("bus");
        let b = registry.get("bus");
        a.record_failure(Utc::now());
        assert_eq!(b.state(), CircuitState::Closed); // below threshold of 5
    }

    #[test]
    fn backoff_caps_at_configured_maximum() {
        let config = EngineConfig::default();
        let delay = backoff_for(ErrorClass::TransientTransport, 20, &config);
        assert!(delay.num_milliseconds() as f64 <= config.retry_max_ms as f64 * 1.1);
    }

    #[test]
    fn non_retrying_classes_get_zero_backoff() {
        let config = EngineConfig::default();
        assert_eq!(backoff_for(ErrorClass::Validation, 1, &config), Duration::zero());
        assert_eq!(backoff_for(ErrorClass::Fatal, 1, &config), Duration::zero());
    }
}
