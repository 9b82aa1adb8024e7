//! Executor error types.
//!
//! Business outcomes (gate, risk, allowlist, not armed) are not errors; they
//! come back as `RouteOutcome::Rejected`. What lands here must stop the
//! operation that hit it.

use thiserror::Error;

use solat_core::{CoreError, OrderId};
use solat_persistence::PersistenceError;
use solat_risk::RiskError;

/// Broker call failure.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    /// Transport-level failure; safe to retry for reads.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker API error: {0}")]
    Api(String),
}

impl BrokerError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Ledger write failed; the operation that needed it was aborted.
    #[error("Ledger write failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Kill switch persistence failed: {0}")]
    KillSwitch(#[from] RiskError),

    /// Programming bug, e.g. an illegal order transition.
    #[error("INVARIANT VIOLATION: {0}")]
    InvariantViolation(#[from] CoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),

    #[error("Not connected to broker")]
    NotConnected,

    /// Returned by the Pending guard when the kill switch is active.
    #[error("Kill switch is active")]
    KillSwitchActive,

    #[error("Execution router is not running")]
    RouterClosed,
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
