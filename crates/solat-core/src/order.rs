//! Orders and the order state machine.
//!
//! ```text
//! Created -> Pending -> Filled -> PartiallyClosed -> Closed
//!    |          |---> Rejected        |    ^  (tranches)
//!    |          |---> Cancelled       +----+
//!    +--> Rejected
//! ```
//!
//! Any pair outside [`ALLOWED_TRANSITIONS`] is a programming error and is
//! reported as [`CoreError::IllegalTransition`]; the state is never coerced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Size};
use crate::error::{CoreError, CoreResult};
use crate::intent::{Direction, Intent, IntentId};

// ============================================================================
// OrderId
// ============================================================================

/// Order identifier, also used as the broker deal reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh reference: `SOLAT_<8 hex>_<unix ms>`.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("SOLAT_{}_{}", &uuid[..8], now.timestamp_millis()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// OrderStatus
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Pending,
    Filled,
    Rejected,
    Cancelled,
    PartiallyClosed,
    Closed,
}

/// Every legal `(from, to)` pair.
pub const ALLOWED_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Created, OrderStatus::Pending),
    (OrderStatus::Created, OrderStatus::Rejected),
    (OrderStatus::Pending, OrderStatus::Filled),
    (OrderStatus::Pending, OrderStatus::Rejected),
    (OrderStatus::Pending, OrderStatus::Cancelled),
    (OrderStatus::Filled, OrderStatus::PartiallyClosed),
    (OrderStatus::Filled, OrderStatus::Closed),
    (OrderStatus::PartiallyClosed, OrderStatus::PartiallyClosed),
    (OrderStatus::PartiallyClosed, OrderStatus::Closed),
];

impl OrderStatus {
    #[must_use]
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        ALLOWED_TRANSITIONS.contains(&(self, to))
    }

    /// No further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Closed)
    }

    /// The order holds (or may hold) broker exposure.
    #[must_use]
    pub fn is_exposed(self) -> bool {
        matches!(self, Self::Pending | Self::Filled | Self::PartiallyClosed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::PartiallyClosed => "partially_closed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Order
// ============================================================================

/// An order owned by the execution router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub intent_id: IntentId,
    pub symbol: String,
    pub direction: Direction,
    pub size: Size,
    pub entry_price: Option<Price>,
    pub sl_price: Option<Price>,
    pub tp_price: Option<Price>,
    pub status: OrderStatus,
    pub fill_price: Option<Price>,
    /// Portion of a filled order that has been closed again.
    #[serde(default)]
    pub closed_size: Size,
    /// Set when the position this order closes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closes: Option<OrderId>,
    /// Submit timed out; only reconciliation may settle this order.
    #[serde(default)]
    pub outcome_unknown: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a `Created` order from an accepted intent.
    #[must_use]
    pub fn from_intent(intent: &Intent, now: DateTime<Utc>) -> Self {
        Self {
            order_id: OrderId::generate(now),
            intent_id: intent.intent_id,
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            size: intent.size,
            entry_price: intent.reference_price,
            sl_price: intent.stop_loss,
            tp_price: intent.take_profit,
            status: OrderStatus::Created,
            fill_price: None,
            closed_size: Size::ZERO,
            closes: intent.closes.clone(),
            outcome_unknown: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate `self.status -> to` against the table without mutating.
    pub fn check_transition(&self, to: OrderStatus) -> CoreResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                order_id: self.order_id.clone(),
                from: self.status,
                to,
            })
        }
    }

    /// Validate and apply a transition, returning the previous status.
    pub fn apply_transition(
        &mut self,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<OrderStatus> {
        self.check_transition(to)?;
        let from = self.status;
        self.status = to;
        self.updated_at = now;
        Ok(from)
    }

    /// Size still open at the broker.
    #[must_use]
    pub fn open_size(&self) -> Size {
        match self.status {
            OrderStatus::Pending | OrderStatus::Filled | OrderStatus::PartiallyClosed => {
                self.size.saturating_sub(self.closed_size)
            }
            _ => Size::ZERO,
        }
    }

    /// Notional of the open size at fill price, entry price, or unit price.
    #[must_use]
    pub fn open_notional(&self) -> Decimal {
        let price = self
            .fill_price
            .or(self.entry_price)
            .unwrap_or(Price::UNIT);
        self.open_size().notional(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        let intent = Intent::new("EURUSD", Direction::Buy, Size::new(dec!(1)), "t", Utc::now());
        Order::from_intent(&intent, Utc::now())
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut o = order();
        let now = Utc::now();
        assert_eq!(o.apply_transition(OrderStatus::Pending, now).unwrap(), OrderStatus::Created);
        o.apply_transition(OrderStatus::Filled, now).unwrap();
        o.apply_transition(OrderStatus::PartiallyClosed, now).unwrap();
        o.apply_transition(OrderStatus::PartiallyClosed, now).unwrap();
        o.apply_transition(OrderStatus::Closed, now).unwrap();
        assert!(o.status.is_terminal());
    }

    #[test]
    fn test_illegal_transition_leaves_state_untouched() {
        let mut o = order();
        let err = o.apply_transition(OrderStatus::Filled, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalTransition {
                from: OrderStatus::Created,
                to: OrderStatus::Filled,
                ..
            }
        ));
        assert_eq!(o.status, OrderStatus::Created);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [OrderStatus::Rejected, OrderStatus::Cancelled, OrderStatus::Closed] {
            assert!(ALLOWED_TRANSITIONS.iter().all(|(from, _)| *from != terminal));
        }
    }

    #[test]
    fn test_open_size_tracks_partial_closes() {
        let mut o = order();
        assert_eq!(o.open_size(), Size::ZERO);
        o.apply_transition(OrderStatus::Pending, Utc::now()).unwrap();
        o.apply_transition(OrderStatus::Filled, Utc::now()).unwrap();
        o.closed_size = Size::new(dec!(0.25));
        assert_eq!(o.open_size(), Size::new(dec!(0.75)));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let now = Utc::now();
        let a = OrderId::generate(now);
        let b = OrderId::generate(now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("SOLAT_"));
    }
}
