//! Error types for solat-core.

use thiserror::Error;

use crate::order::{OrderId, OrderStatus};

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A transition outside the allowed table. Always a programming bug.
    #[error("Illegal order transition for {order_id}: {from} -> {to}")]
    IllegalTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
