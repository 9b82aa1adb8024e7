//! Duplicate-intent guard and execution circuit breaker.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use solat_core::IntentId;

// ============================================================================
// IdempotencyGuard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "IdempotencyConfig::default_window_s")]
    pub window_s: u64,
    #[serde(default = "IdempotencyConfig::default_max_keys")]
    pub max_keys: usize,
}

impl IdempotencyConfig {
    fn default_window_s() -> u64 {
        60
    }

    fn default_max_keys() -> usize {
        1_000
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            window_s: Self::default_window_s(),
            max_keys: Self::default_max_keys(),
        }
    }
}

/// Rejects an intent id seen within the window.
///
/// Bounded: past `max_keys` the oldest tenth is evicted, so a flood of ids
/// can replay an evicted one. The broker's deal reference is the backstop.
#[derive(Debug)]
pub struct IdempotencyGuard {
    config: IdempotencyConfig,
    seen: HashMap<IntentId, DateTime<Utc>>,
    order: VecDeque<(IntentId, DateTime<Utc>)>,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Register `intent_id`. Returns the age in seconds of a previous
    /// sighting when it is a duplicate.
    pub fn check_and_register(&mut self, intent_id: IntentId, now: DateTime<Utc>) -> Option<i64> {
        self.expire(now);
        if let Some(seen_at) = self.seen.get(&intent_id) {
            let age_s = (now - *seen_at).num_seconds();
            warn!(%intent_id, age_s, "Duplicate intent rejected");
            return Some(age_s);
        }
        self.seen.insert(intent_id, now);
        self.order.push_back((intent_id, now));
        if self.seen.len() > self.config.max_keys {
            let evict = (self.seen.len() / 10).max(1);
            for _ in 0..evict {
                if let Some((id, _)) = self.order.pop_front() {
                    self.seen.remove(&id);
                }
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.config.window_s as i64);
        while let Some((id, ts)) = self.order.front() {
            if *ts >= cutoff {
                break;
            }
            self.seen.remove(id);
            self.order.pop_front();
        }
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "CircuitBreakerConfig::default_threshold")]
    pub error_threshold: usize,
    #[serde(default = "CircuitBreakerConfig::default_window_s")]
    pub error_window_s: u64,
    #[serde(default = "CircuitBreakerConfig::default_cooldown_s")]
    pub cooldown_s: u64,
}

impl CircuitBreakerConfig {
    fn default_threshold() -> usize {
        5
    }

    fn default_window_s() -> u64 {
        60
    }

    fn default_cooldown_s() -> u64 {
        120
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: Self::default_threshold(),
            error_window_s: Self::default_window_s(),
            cooldown_s: Self::default_cooldown_s(),
        }
    }
}

/// Pauses submission after repeated broker errors. Resets after cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    errors: VecDeque<DateTime<Utc>>,
    tripped_at: Option<DateTime<Utc>>,
    total_trips: u64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            errors: VecDeque::new(),
            tripped_at: None,
            total_trips: 0,
        }
    }

    /// Remaining cooldown in seconds while tripped.
    pub fn open_for(&mut self, now: DateTime<Utc>) -> Option<i64> {
        let tripped_at = self.tripped_at?;
        let remaining = self.config.cooldown_s as i64 - (now - tripped_at).num_seconds();
        if remaining <= 0 {
            info!("Circuit breaker reset after cooldown");
            self.tripped_at = None;
            self.errors.clear();
            return None;
        }
        Some(remaining)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tripped_at.is_some()
    }

    #[must_use]
    pub fn total_trips(&self) -> u64 {
        self.total_trips
    }

    /// Record a failed submission. Returns true if this error tripped it.
    pub fn record_error(&mut self, error: &str, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::seconds(self.config.error_window_s as i64);
        self.errors.push_back(now);
        while self.errors.front().is_some_and(|t| *t <= cutoff) {
            self.errors.pop_front();
        }
        if self.tripped_at.is_none() && self.errors.len() >= self.config.error_threshold {
            self.tripped_at = Some(now);
            self.total_trips += 1;
            warn!(
                errors = self.errors.len(),
                cooldown_s = self.config.cooldown_s,
                last_error = %error,
                "Circuit breaker tripped"
            );
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_window() {
        let mut guard = IdempotencyGuard::new(IdempotencyConfig::default());
        let id = IntentId::new();
        let t0 = Utc::now();
        assert_eq!(guard.check_and_register(id, t0), None);
        assert_eq!(guard.check_and_register(id, t0 + Duration::seconds(5)), Some(5));
    }

    #[test]
    fn test_id_replayable_after_window() {
        let mut guard = IdempotencyGuard::new(IdempotencyConfig::default());
        let id = IntentId::new();
        let t0 = Utc::now();
        guard.check_and_register(id, t0);
        assert_eq!(guard.check_and_register(id, t0 + Duration::seconds(61)), None);
    }

    #[test]
    fn test_guard_is_bounded() {
        let mut guard = IdempotencyGuard::new(IdempotencyConfig {
            window_s: 3_600,
            max_keys: 100,
        });
        let now = Utc::now();
        for _ in 0..500 {
            guard.check_and_register(IntentId::new(), now);
        }
        assert!(guard.len() <= 100);
    }

    #[test]
    fn test_breaker_trips_and_cools_down() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let t0 = Utc::now();
        for i in 0..4 {
            assert!(!breaker.record_error("timeout", t0 + Duration::seconds(i)));
        }
        assert!(breaker.record_error("timeout", t0 + Duration::seconds(4)));
        assert_eq!(breaker.open_for(t0 + Duration::seconds(10)), Some(114));
        assert_eq!(breaker.open_for(t0 + Duration::seconds(125)), None);
        assert!(!breaker.is_open());
        assert_eq!(breaker.total_trips(), 1);
    }

    #[test]
    fn test_old_errors_fall_out_of_window() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let t0 = Utc::now();
        for i in 0..4 {
            breaker.record_error("x", t0 + Duration::seconds(i));
        }
        assert!(!breaker.record_error("x", t0 + Duration::seconds(120)));
    }
}
