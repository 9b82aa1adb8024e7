//! Core domain types for the execution safety core.
//!
//! This crate provides the types every other crate speaks:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Intent`, `Direction`, `IntentId`: Upstream trade requests
//! - `Order`, `OrderStatus`, `OrderId`: Order lifecycle and its transition table
//! - `Fill`, `OpenPosition`, `BrokerPosition`, `AccountInfo`: Execution and broker truth
//! - `TradingMode`: DEMO vs LIVE
//! - `Clock`: Injectable time source

pub mod clock;
pub mod decimal;
pub mod error;
pub mod intent;
pub mod mode;
pub mod order;
pub mod position;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, CoreResult};
pub use intent::{Direction, Intent, IntentId};
pub use mode::TradingMode;
pub use order::{Order, OrderId, OrderStatus, ALLOWED_TRANSITIONS};
pub use position::{AccountInfo, BrokerPosition, Fill, OpenPosition};
