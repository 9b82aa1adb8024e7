//! Execution router configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use solat_core::TradingMode;

use crate::account::StalenessPolicy;
use crate::retry::RetryPolicy;
use crate::safety::{CircuitBreakerConfig, IdempotencyConfig};

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    256
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

/// Broker call deadlines. Every broker call runs under one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_ms: u64,
    /// Account, positions and close calls.
    #[serde(default = "default_read_timeout_ms")]
    pub read_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            submit_ms: default_submit_timeout_ms(),
            read_ms: default_read_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }

    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
}

/// Close-all behaviour after a kill switch activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPolicy {
    #[serde(default = "SweepPolicy::default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "SweepPolicy::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "SweepPolicy::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl SweepPolicy {
    fn default_attempts() -> u32 {
        3
    }

    fn default_base_delay_ms() -> u64 {
        500
    }

    fn default_max_delay_ms() -> u64 {
        4_000
    }

    #[must_use]
    pub fn as_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "ReconcileConfig::default_interval_s")]
    pub interval_s: u64,
    /// Number of drifted positions tolerated before escalation.
    #[serde(default)]
    pub drift_tolerance: usize,
    #[serde(default = "default_true")]
    pub kill_on_drift: bool,
    /// Absolute size difference treated as equal.
    #[serde(default = "ReconcileConfig::default_size_tolerance")]
    pub size_tolerance: Decimal,
}

impl ReconcileConfig {
    fn default_interval_s() -> u64 {
        5
    }

    fn default_size_tolerance() -> Decimal {
        Decimal::new(1, 4)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_s: Self::default_interval_s(),
            drift_tolerance: 0,
            kill_on_drift: true,
            size_tolerance: Self::default_size_tolerance(),
        }
    }
}

/// Advisory flags read by the signal layer.
///
/// `signals_enabled` is only reported back; the router does not consult it.
/// `demo_arm_enabled` lets an unarmed DEMO router still place orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeFlags {
    #[serde(default = "default_true")]
    pub signals_enabled: bool,
    #[serde(default)]
    pub demo_arm_enabled: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            signals_enabled: true,
            demo_arm_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Mode the router starts in. LIVE still needs arming and confirmation.
    #[serde(default)]
    pub mode: TradingMode,
    /// `arm` refuses unless the caller passes `confirm = true`.
    #[serde(default = "default_true")]
    pub require_arm_confirmation: bool,
    #[serde(default)]
    pub close_on_kill_switch: bool,
    /// Symbols that may be routed. Empty rejects everything.
    #[serde(default)]
    pub allowlist: BTreeSet<String>,
    #[serde(default)]
    pub flags: ModeFlags,
    #[serde(default)]
    pub sweep: SweepPolicy,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Retries for idempotent reads only. Submits are never retried.
    #[serde(default)]
    pub read_retry: RetryPolicy,
    #[serde(default)]
    pub balance: StalenessPolicy,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::default(),
            require_arm_confirmation: true,
            close_on_kill_switch: false,
            allowlist: BTreeSet::new(),
            flags: ModeFlags::default(),
            sweep: SweepPolicy::default(),
            timeouts: TimeoutConfig::default(),
            read_retry: RetryPolicy::default(),
            balance: StalenessPolicy::default(),
            reconcile: ReconcileConfig::default(),
            idempotency: IdempotencyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_uses_defaults() {
        let cfg: ExecutionConfig = from_json("{}");
        assert_eq!(cfg.mode, TradingMode::Demo);
        assert!(cfg.require_arm_confirmation);
        assert!(!cfg.close_on_kill_switch);
        assert_eq!(cfg.timeouts.submit_ms, 10_000);
        assert_eq!(cfg.sweep.max_attempts, 3);
        assert_eq!(cfg.reconcile.drift_tolerance, 0);
        assert!(cfg.flags.signals_enabled);
        assert!(!cfg.flags.demo_arm_enabled);
    }

    #[test]
    fn test_partial_override() {
        let cfg: ExecutionConfig = from_json(
            r#"{"mode":"LIVE","allowlist":["EURUSD"],"timeouts":{"submit_ms":2000}}"#,
        );
        assert!(cfg.mode.is_live());
        assert!(cfg.allowlist.contains("EURUSD"));
        assert_eq!(cfg.timeouts.submit(), Duration::from_secs(2));
        assert_eq!(cfg.timeouts.read_ms, 5_000);
    }

    fn from_json(json: &str) -> ExecutionConfig {
        serde_json::from_str(json).unwrap()
    }
}
