//! Ledger record types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use solat_core::{Fill, Intent, IntentId, Order, OrderId, OrderStatus, Size};

/// One line of `ledger.jsonl`.
///
/// `seq` is the append position within the run; `ts` is the wall-clock time
/// the entry was written, so external readers can verify ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub event: LedgerEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    IntentLogged {
        intent: Intent,
    },
    /// Closes an intent that never became an order.
    IntentRejected {
        intent_id: IntentId,
        kind: String,
        reason: String,
    },
    OrderCreated {
        order: Order,
    },
    OrderTransitioned {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    FillRecorded {
        fill: Fill,
    },
    /// Submit outcome unknown (timeout or transport error).
    SubmissionUnknown {
        order_id: OrderId,
        detail: String,
    },
    Snapshot {
        position_count: usize,
        gross_notional: Decimal,
    },
    KillSwitchChanged {
        active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ReconciliationDrift {
        drift: Vec<DriftRecord>,
    },
}

impl LedgerEvent {
    /// The `type` tag as written to disk.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IntentLogged { .. } => "intent_logged",
            Self::IntentRejected { .. } => "intent_rejected",
            Self::OrderCreated { .. } => "order_created",
            Self::OrderTransitioned { .. } => "order_transitioned",
            Self::FillRecorded { .. } => "fill_recorded",
            Self::SubmissionUnknown { .. } => "submission_unknown",
            Self::Snapshot { .. } => "snapshot",
            Self::KillSwitchChanged { .. } => "kill_switch_changed",
            Self::ReconciliationDrift { .. } => "reconciliation_drift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Broker has it, we do not.
    MissingLocally,
    /// We have it, broker does not.
    MissingOnBroker,
    SizeMismatch,
}

/// One position that differs between local state and the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub kind: DriftKind,
    pub order_id: OrderId,
    pub symbol: String,
    pub local_size: Option<Size>,
    pub broker_size: Option<Size>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, Price};

    #[test]
    fn test_tagged_json_shape() {
        let entry = LedgerEntry {
            seq: 7,
            ts: Utc::now(),
            event: LedgerEvent::OrderTransitioned {
                order_id: OrderId::new("SOLAT_1"),
                from: OrderStatus::Created,
                to: OrderStatus::Pending,
                reason: None,
            },
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["event"]["type"], "order_transitioned");
        assert_eq!(v["event"]["to"], "pending");
        assert!(v["event"].get("reason").is_none());
    }

    #[test]
    fn test_fill_with_decimals_parses_back() {
        let fill = Fill {
            order_id: OrderId::new("SOLAT_2"),
            price: Price::new(dec!(1.08345)),
            size: Size::new(dec!(0.5)),
            ts: Utc::now(),
            is_close: true,
            pnl: Some(dec!(-12.5)),
        };
        let entry = LedgerEntry {
            seq: 1,
            ts: Utc::now(),
            event: LedgerEvent::FillRecorded { fill },
        };
        let line = serde_json::to_string(&entry).unwrap();
        let back: LedgerEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);

        let intent = Intent::new("EURUSD", Direction::Buy, Size::new(dec!(1)), "t", Utc::now());
        let logged = LedgerEvent::IntentLogged { intent };
        assert_eq!(logged.kind(), "intent_logged");
    }
}
