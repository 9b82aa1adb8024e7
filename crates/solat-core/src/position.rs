//! Fills, positions and broker-reported account truth.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Size};
use crate::intent::Direction;
use crate::order::OrderId;

/// Immutable broker confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub price: Price,
    pub size: Size,
    pub ts: DateTime<Utc>,
    pub is_close: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
}

/// A locally tracked open position. Keyed by the order that opened it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub order_id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub size: Size,
    pub entry_price: Price,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.entry_price)
    }

    /// Realized PnL of closing `size` of this position at `exit`.
    #[must_use]
    pub fn pnl_at(&self, exit: Price, size: Size) -> Decimal {
        (exit.inner() - self.entry_price.inner()) * size.inner() * self.direction.sign()
    }
}

/// Position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Deal reference supplied at submit time.
    pub order_id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub size: Size,
    pub open_level: Price,
}

/// Broker account summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub balance: Decimal,
    pub available: Decimal,
    pub currency: String,
    pub is_live: bool,
}
