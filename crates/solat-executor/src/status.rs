//! Router outcomes and status views.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use solat_core::{Fill, OrderId, Price, Size, TradingMode};
use solat_risk::{KillSwitchState, RiskRejection};

// ============================================================================
// RouteOutcome
// ============================================================================

/// Why an intent did not become a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Duplicate,
    Allowlist,
    InvalidIntent,
    KillSwitch,
    Gate,
    NotConnected,
    CircuitBreaker,
    StaleAccount,
    Risk,
    NotArmed,
    Broker,
}

impl RejectionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Allowlist => "allowlist",
            Self::InvalidIntent => "invalid_intent",
            Self::KillSwitch => "kill_switch",
            Self::Gate => "gate",
            Self::NotConnected => "not_connected",
            Self::CircuitBreaker => "circuit_breaker",
            Self::StaleAccount => "stale_account",
            Self::Risk => "risk",
            Self::NotArmed => "not_armed",
            Self::Broker => "broker",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    /// Operator-facing explanation.
    pub reason: String,
    /// Limit values when `kind` is `Risk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskRejection>,
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            risk: None,
        }
    }

    #[must_use]
    pub fn risk(rejection: RiskRejection) -> Self {
        Self {
            kind: RejectionKind::Risk,
            reason: rejection.to_string(),
            risk: Some(rejection),
        }
    }
}

/// What became of a routed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Filled { order_id: OrderId, fill: Fill },
    /// Accepted by the broker, fill pending.
    Submitted { order_id: OrderId },
    /// Submit timed out or failed in transit. Settled by reconciliation.
    Unknown { order_id: OrderId, detail: String },
    Rejected(Rejection),
}

impl RouteOutcome {
    #[must_use]
    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Filled { order_id, .. }
            | Self::Submitted { order_id }
            | Self::Unknown { order_id, .. } => Some(order_id),
            Self::Rejected(_) => None,
        }
    }

    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Label used for the intents counter.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Filled { .. } => "filled",
            Self::Submitted { .. } => "submitted",
            Self::Unknown { .. } => "unknown",
            Self::Rejected(_) => "rejected",
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Fill reported asynchronously by the broker for a working order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerFill {
    pub order_id: OrderId,
    pub price: Price,
    pub size: Size,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmResult {
    pub ok: bool,
    pub message: String,
    pub mode: TradingMode,
}

/// Result of the close-all sweep after a kill switch activation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub closed: Vec<OrderId>,
    /// Still open after every attempt; needs an operator.
    pub left_open: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchOutcome {
    /// False when the switch was already active.
    pub activated: bool,
    pub state: KillSwitchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepReport>,
}

// ============================================================================
// ExecutionStatus
// ============================================================================

/// Snapshot of router state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub connected: bool,
    pub broker: Option<String>,
    pub armed: bool,
    pub mode: TradingMode,
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub open_positions: usize,
    pub pending_orders: usize,
    pub unknown_orders: usize,
    /// Orders not yet in a terminal state.
    pub tracked_orders: usize,
    pub realized_pnl_today: Decimal,
    pub account_id: Option<String>,
    pub balance: Decimal,
    pub balance_age_s: Option<i64>,
    pub signals_enabled: bool,
    pub demo_arm_enabled: bool,
    pub circuit_breaker_open: bool,
    pub buffered_snapshots: usize,
    pub last_reconciliation: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_rejection_carries_limit_values() {
        let r = Rejection::risk(RiskRejection::ConcurrencyCap { open: 5, max: 5 });
        assert_eq!(r.kind, RejectionKind::Risk);
        assert!(r.reason.contains('5'));
        assert!(matches!(r.risk, Some(RiskRejection::ConcurrencyCap { .. })));
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = RouteOutcome::Rejected(Rejection::new(RejectionKind::Allowlist, "SYMBOL_NOT_ALLOWLISTED: XAU"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["kind"], "allowlist");

        let filled = RouteOutcome::Submitted {
            order_id: OrderId::new("SOLAT_x"),
        };
        assert_eq!(filled.label(), "submitted");
        assert_eq!(filled.order_id().unwrap().as_str(), "SOLAT_x");
    }
}
