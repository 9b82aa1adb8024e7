//! Broker adapter seam.
//!
//! The router only talks to a broker through [`BrokerAdapter`]. Methods
//! return boxed futures so the trait stays object-safe and the router can hold
//! an `Arc<dyn BrokerAdapter>` chosen at connect time.

use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use solat_core::{AccountInfo, BrokerPosition, Direction, Order, OrderId, Price, Size};

use crate::error::BrokerResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Shared broker handle.
pub type DynBroker = Arc<dyn BrokerAdapter>;

/// Order as sent to the broker. `order_id` doubles as the deal reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub size: Size,
    pub reference_price: Option<Price>,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    /// Position being reduced, if this is a closing order.
    pub closes: Option<OrderId>,
}

impl From<&Order> for OrderRequest {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            direction: order.direction,
            size: order.size,
            reference_price: order.entry_price,
            stop_loss: order.sl_price,
            take_profit: order.tp_price,
            closes: order.closes.clone(),
        }
    }
}

/// Broker's answer to a submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitAck {
    /// Executed immediately.
    Filled { price: Price, size: Size },
    /// Accepted; the fill will arrive later through `on_broker_fill`.
    Working,
    /// Refused by the broker.
    Rejected { reason: String },
}

/// Direct close of an open position, bypassing order creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub order_id: OrderId,
    pub symbol: String,
    /// Direction of the position being closed.
    pub direction: Direction,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAck {
    pub price: Price,
    pub size: Size,
}

/// Broker operations the router depends on.
///
/// Implementations must not retry `submit_order` internally: a resubmit after
/// an ambiguous failure can double the position.
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_account(&self) -> BoxFuture<'_, BrokerResult<AccountInfo>>;

    fn fetch_positions(&self) -> BoxFuture<'_, BrokerResult<Vec<BrokerPosition>>>;

    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<SubmitAck>>;

    fn close_position(&self, request: CloseRequest) -> BoxFuture<'_, BrokerResult<CloseAck>>;
}
