//! Risk limits and emergency stop.
//!
//! Implements the checks every intent must pass before an order exists:
//! - ExposureCap: Per-symbol notional within cap
//! - ConcurrencyCap: Open positions below the maximum (closes exempt)
//! - DailyLoss: Realized PnL today above the loss floor
//! - RateLimit: Trades in the trailing hour below the maximum
//! - OrderSize: Single order within the locked ceiling
//! - DealingRules: Per-symbol minimum size and size step
//! - StopLoss: Optional stop-loss requirement for opening intents
//!
//! Also provides:
//! - KillSwitch: Durable emergency stop restored before any routing

pub mod engine;
pub mod error;
pub mod kill_switch;
pub mod limits;

pub use engine::{RiskContext, RiskDecision, RiskEngine, RiskRejection};
pub use error::{RiskError, RiskResult};
pub use kill_switch::{KillSwitch, KillSwitchReason, KillSwitchState};
pub use limits::{DealingRules, RiskLimits, RiskLimitsConfig};
