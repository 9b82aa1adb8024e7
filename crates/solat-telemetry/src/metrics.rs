//! Prometheus metrics for the execution core.
//!
//! # Panics
//!
//! Registration uses `unwrap()`: a failure means duplicate metric names,
//! a startup bug that should crash immediately. It only happens during
//! lazy static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

use crate::error::TelemetryResult;

/// Intents by final outcome (filled/submitted/unknown/rejected).
pub static INTENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "solat_intents_total",
        "Intents routed, by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Rejections by kind (gate/risk/kill_switch/allowlist/...).
pub static REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "solat_rejections_total",
        "Intent rejections, by kind",
        &["kind"]
    )
    .unwrap()
});

/// Risk rejections by limit name.
pub static RISK_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "solat_risk_rejections_total",
        "Risk engine rejections, by limit",
        &["limit"]
    )
    .unwrap()
});

pub static KILL_SWITCH_ACTIVE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("solat_kill_switch_active", "Kill switch state (1=active)").unwrap()
});

pub static OPEN_POSITIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("solat_open_positions", "Locally tracked open positions").unwrap()
});

pub static RECONCILIATION_DRIFT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "solat_reconciliation_drift_total",
        "Reconciliation runs that found drift"
    )
    .unwrap()
});

pub static LEDGER_APPEND_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "solat_ledger_append_failures_total",
        "Ledger appends that failed and aborted their operation"
    )
    .unwrap()
});

/// Broker call timeouts by operation.
pub static BROKER_TIMEOUTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "solat_broker_timeouts_total",
        "Broker calls that hit their timeout",
        &["op"]
    )
    .unwrap()
});

/// Facade over the statics.
pub struct Metrics;

impl Metrics {
    pub fn intent_outcome(outcome: &str) {
        INTENTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn rejection(kind: &str) {
        REJECTIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn risk_rejection(limit: &str) {
        RISK_REJECTIONS_TOTAL.with_label_values(&[limit]).inc();
    }

    pub fn kill_switch(active: bool) {
        KILL_SWITCH_ACTIVE.set(if active { 1.0 } else { 0.0 });
    }

    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(count as f64);
    }

    pub fn reconciliation_drift() {
        RECONCILIATION_DRIFT_TOTAL.inc();
    }

    pub fn ledger_append_failure() {
        LEDGER_APPEND_FAILURES_TOTAL.inc();
    }

    pub fn broker_timeout(op: &str) {
        BROKER_TIMEOUTS_TOTAL.with_label_values(&[op]).inc();
    }

    /// Render the default registry in text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
