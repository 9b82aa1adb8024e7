//! Trade intents produced by the signal layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Size};
use crate::order::OrderId;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// 1 for buy, -1 for sell.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Unique intent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub Uuid);

impl IntentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to trade. Immutable once created.
///
/// `closes` marks an intent that reduces an existing position instead of
/// opening a new one; it exempts the intent from the concurrency cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: IntentId,
    pub symbol: String,
    pub direction: Direction,
    pub size: Size,
    pub bot_source: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closes: Option<OrderId>,
}

impl Intent {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        size: Size,
        bot_source: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: IntentId::new(),
            symbol: symbol.into(),
            direction,
            size,
            bot_source: bot_source.into(),
            created_at,
            reference_price: None,
            stop_loss: None,
            take_profit: None,
            closes: None,
        }
    }

    #[must_use]
    pub fn with_reference_price(mut self, price: Price) -> Self {
        self.reference_price = Some(price);
        self
    }

    #[must_use]
    pub fn with_stops(mut self, stop_loss: Option<Price>, take_profit: Option<Price>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// Mark this intent as closing the position opened by `order_id`.
    #[must_use]
    pub fn closing(mut self, order_id: OrderId) -> Self {
        self.closes = Some(order_id);
        self
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        self.closes.is_some()
    }

    /// Price used for notional calculations. Falls back to a unit price.
    #[must_use]
    pub fn pricing(&self) -> Price {
        self.reference_price.unwrap_or(Price::UNIT)
    }

    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.pricing())
    }
}
