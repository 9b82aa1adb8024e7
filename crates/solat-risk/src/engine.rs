//! Pre-trade risk evaluation.
//!
//! `RiskEngine::check` is a pure function of the intent, the limits and the
//! `RiskContext` snapshot the caller read under its lock. Checks run in a
//! fixed order and stop at the first failure:
//!
//! 1. ExposureCap
//! 2. ConcurrencyCap (skipped for closing intents)
//! 3. DailyLoss
//! 4. RateLimit
//! 5. OrderSize
//! 6. BelowMinSize / SizeStep (per-symbol dealing rules)
//! 7. StopLossRequired (opening intents, when configured)
//!
//! A `DailyLoss` rejection is the one outcome that must escalate: the caller
//! is required to activate the kill switch when
//! [`RiskRejection::requires_kill_switch`] is true.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use solat_core::{Intent, OpenPosition, Size};

use crate::limits::RiskLimits;

// ============================================================================
// RiskContext
// ============================================================================

/// Portfolio state the checks read.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    /// Account balance used as the daily-loss denominator.
    pub balance: Decimal,
    /// Open positions plus in-flight orders.
    pub open_positions: &'a [OpenPosition],
    pub realized_pnl_today: Decimal,
    /// Timestamps of recent executed trades (any order).
    pub recent_trades: &'a [DateTime<Utc>],
    pub now: DateTime<Utc>,
}

// ============================================================================
// RiskRejection
// ============================================================================

/// A specific limit breach, carrying the values that breached it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "limit", rename_all = "snake_case")]
pub enum RiskRejection {
    ExposureCap {
        symbol: String,
        current: Decimal,
        proposed: Decimal,
        cap: Decimal,
    },
    ConcurrencyCap {
        open: usize,
        max: u32,
    },
    DailyLoss {
        realized_pnl: Decimal,
        loss_pct: Decimal,
        limit_pct: Decimal,
    },
    /// Balance is zero or negative so the daily loss ratio is undefined.
    BalanceUnavailable {
        balance: Decimal,
    },
    RateLimit {
        trades: usize,
        max: u32,
    },
    OrderSize {
        size: Size,
        max: Size,
    },
    BelowMinSize {
        symbol: String,
        size: Size,
        min: Size,
    },
    /// Not a whole multiple of the symbol's size step. Sizes are never
    /// rounded on the caller's behalf.
    SizeStep {
        symbol: String,
        size: Size,
        step: Size,
    },
    StopLossRequired,
}

impl RiskRejection {
    /// Stable limit name for metrics and ledger records.
    #[must_use]
    pub fn limit_name(&self) -> &'static str {
        match self {
            Self::ExposureCap { .. } => "exposure_cap",
            Self::ConcurrencyCap { .. } => "concurrency_cap",
            Self::DailyLoss { .. } => "daily_loss",
            Self::BalanceUnavailable { .. } => "balance_unavailable",
            Self::RateLimit { .. } => "rate_limit",
            Self::OrderSize { .. } => "order_size",
            Self::BelowMinSize { .. } => "min_size",
            Self::SizeStep { .. } => "size_step",
            Self::StopLossRequired => "stop_loss_required",
        }
    }

    #[must_use]
    pub fn requires_kill_switch(&self) -> bool {
        matches!(self, Self::DailyLoss { .. })
    }
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExposureCap {
                symbol,
                current,
                proposed,
                cap,
            } => write!(
                f,
                "Per-symbol exposure cap exceeded for {symbol}: current {current} + proposed {proposed} > cap {cap}"
            ),
            Self::ConcurrencyCap { open, max } => {
                write!(f, "Max concurrent positions reached: {open} open, limit {max}")
            }
            Self::DailyLoss {
                realized_pnl,
                loss_pct,
                limit_pct,
            } => write!(
                f,
                "Daily loss limit breached: realized {realized_pnl} ({loss_pct}%) exceeds {limit_pct}%"
            ),
            Self::BalanceUnavailable { balance } => {
                write!(f, "Account balance unavailable for daily loss check: {balance}")
            }
            Self::RateLimit { trades, max } => {
                write!(f, "Trade rate limit reached: {trades} trades in the last hour, limit {max}")
            }
            Self::OrderSize { size, max } => {
                write!(f, "Order size {size} exceeds max order size {max}")
            }
            Self::BelowMinSize { symbol, size, min } => {
                write!(f, "Order size {size} below minimum {min} for {symbol}")
            }
            Self::SizeStep { symbol, size, step } => {
                write!(f, "Order size {size} is not a multiple of the {step} size step for {symbol}")
            }
            Self::StopLossRequired => write!(f, "Stop loss is required but not provided"),
        }
    }
}

// ============================================================================
// RiskDecision
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RiskDecision {
    pub allow: bool,
    pub reason: Option<RiskRejection>,
}

impl RiskDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn reject(reason: RiskRejection) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
        }
    }
}

// ============================================================================
// RiskEngine
// ============================================================================

#[derive(Debug, Clone)]
pub struct RiskEngine {
    limits: RiskLimits,
}

impl RiskEngine {
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Run every check in order. Identical inputs always yield identical decisions.
    #[must_use]
    pub fn check(&self, intent: &Intent, ctx: &RiskContext<'_>) -> RiskDecision {
        let checks: [fn(&Self, &Intent, &RiskContext<'_>) -> Option<RiskRejection>; 7] = [
            Self::check_exposure,
            Self::check_concurrency,
            Self::check_daily_loss,
            Self::check_rate,
            Self::check_order_size,
            Self::check_dealing_rules,
            Self::check_stop_loss,
        ];

        for check in checks {
            if let Some(rejection) = check(self, intent, ctx) {
                debug!(
                    intent_id = %intent.intent_id,
                    limit = rejection.limit_name(),
                    reason = %rejection,
                    "Risk check failed"
                );
                return RiskDecision::reject(rejection);
            }
        }
        RiskDecision::allow()
    }

    fn check_exposure(&self, intent: &Intent, ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        // A close reduces exposure.
        if intent.is_close() {
            return None;
        }
        let current: Decimal = ctx
            .open_positions
            .iter()
            .filter(|p| p.symbol == intent.symbol)
            .map(OpenPosition::notional)
            .sum();
        let proposed = intent.notional();
        let cap = self.limits.per_symbol_exposure_cap;
        (current + proposed > cap).then(|| RiskRejection::ExposureCap {
            symbol: intent.symbol.clone(),
            current,
            proposed,
            cap,
        })
    }

    fn check_concurrency(&self, intent: &Intent, ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        if intent.is_close() {
            return None;
        }
        let open = ctx.open_positions.len();
        let max = self.limits.max_concurrent_positions;
        (open >= max as usize).then_some(RiskRejection::ConcurrencyCap { open, max })
    }

    fn check_daily_loss(&self, _intent: &Intent, ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        if ctx.balance <= Decimal::ZERO {
            return Some(RiskRejection::BalanceUnavailable {
                balance: ctx.balance,
            });
        }
        let ratio_pct = ctx.realized_pnl_today / ctx.balance * Decimal::ONE_HUNDRED;
        let limit_pct = self.limits.max_daily_loss_pct;
        (ratio_pct < -limit_pct).then(|| RiskRejection::DailyLoss {
            realized_pnl: ctx.realized_pnl_today,
            loss_pct: (-ratio_pct).round_dp(2),
            limit_pct,
        })
    }

    fn check_rate(&self, _intent: &Intent, ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        let window_start = ctx.now - Duration::hours(1);
        let trades = ctx
            .recent_trades
            .iter()
            .filter(|ts| **ts > window_start && **ts <= ctx.now)
            .count();
        let max = self.limits.max_trades_per_hour;
        (trades >= max as usize).then_some(RiskRejection::RateLimit { trades, max })
    }

    fn check_order_size(&self, intent: &Intent, _ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        let max = self.limits.max_order_size;
        (intent.size > max).then_some(RiskRejection::OrderSize {
            size: intent.size,
            max,
        })
    }

    fn check_dealing_rules(&self, intent: &Intent, _ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        let rules = self.limits.dealing_rules.get(&intent.symbol)?;
        if let Some(min) = rules.min_size.filter(|min| intent.size < *min) {
            return Some(RiskRejection::BelowMinSize {
                symbol: intent.symbol.clone(),
                size: intent.size,
                min,
            });
        }
        let step = rules.size_step.filter(Size::is_positive)?;
        let off_step = !(intent.size.inner() % step.inner()).is_zero();
        off_step.then(|| RiskRejection::SizeStep {
            symbol: intent.symbol.clone(),
            size: intent.size,
            step,
        })
    }

    fn check_stop_loss(&self, intent: &Intent, _ctx: &RiskContext<'_>) -> Option<RiskRejection> {
        let missing = self.limits.require_stop_loss && !intent.is_close() && intent.stop_loss.is_none();
        missing.then_some(RiskRejection::StopLossRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, OrderId, Price};
    use crate::limits::DealingRules;

    fn limits() -> RiskLimits {
        RiskLimits {
            per_symbol_exposure_cap: dec!(1000),
            max_concurrent_positions: 2,
            max_daily_loss_pct: dec!(5),
            max_trades_per_hour: 3,
            max_order_size: Size::new(dec!(10)),
            ..RiskLimits::default()
        }
    }

    fn intent(symbol: &str, size: Decimal, price: Decimal) -> Intent {
        Intent::new(symbol, Direction::Buy, Size::new(size), "test", Utc::now())
            .with_reference_price(Price::new(price))
    }

    fn position(symbol: &str, size: Decimal, price: Decimal) -> OpenPosition {
        OpenPosition {
            order_id: OrderId::new(format!("SOLAT_{symbol}_{size}")),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            size: Size::new(size),
            entry_price: Price::new(price),
            opened_at: Utc::now(),
        }
    }

    fn ctx<'a>(
        positions: &'a [OpenPosition],
        trades: &'a [DateTime<Utc>],
        pnl: Decimal,
    ) -> RiskContext<'a> {
        RiskContext {
            balance: dec!(10000),
            open_positions: positions,
            realized_pnl_today: pnl,
            recent_trades: trades,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_allows_within_limits() {
        let engine = RiskEngine::new(limits());
        let d = engine.check(&intent("EURUSD", dec!(1), dec!(100)), &ctx(&[], &[], dec!(0)));
        assert!(d.allow);
        assert!(d.reason.is_none());
    }

    #[test]
    fn test_exposure_cap_sums_same_symbol_only() {
        let engine = RiskEngine::new(limits());
        let positions = vec![position("EURUSD", dec!(6), dec!(100)), position("GBPUSD", dec!(9), dec!(100))];
        let d = engine.check(&intent("EURUSD", dec!(5), dec!(100)), &ctx(&positions, &[], dec!(0)));
        assert_eq!(
            d.reason,
            Some(RiskRejection::ExposureCap {
                symbol: "EURUSD".to_string(),
                current: dec!(600),
                proposed: dec!(500),
                cap: dec!(1000),
            })
        );
        let msg = d.reason.unwrap().to_string();
        assert!(msg.contains("EURUSD") && msg.contains("1000"));

        let ok = engine.check(&intent("EURUSD", dec!(4), dec!(100)), &ctx(&positions, &[], dec!(0)));
        assert!(ok.allow);
    }

    #[test]
    fn test_concurrency_cap_exempts_closes() {
        let engine = RiskEngine::new(limits());
        let positions = vec![position("A", dec!(1), dec!(1)), position("B", dec!(1), dec!(1))];
        let d = engine.check(&intent("C", dec!(1), dec!(1)), &ctx(&positions, &[], dec!(0)));
        assert_eq!(d.reason, Some(RiskRejection::ConcurrencyCap { open: 2, max: 2 }));

        let close = Intent::new("A", Direction::Sell, Size::new(dec!(1)), "t", Utc::now())
            .closing(positions[0].order_id.clone());
        assert!(engine.check(&close, &ctx(&positions, &[], dec!(0))).allow);
    }

    #[test]
    fn test_daily_loss_requires_kill_switch() {
        let engine = RiskEngine::new(limits());
        let d = engine.check(&intent("EURUSD", dec!(1), dec!(1)), &ctx(&[], &[], dec!(-600)));
        let reason = d.reason.unwrap();
        assert!(reason.requires_kill_switch());
        assert_eq!(reason.limit_name(), "daily_loss");
        assert!(reason.to_string().contains("6"));

        // Exactly at the floor is still allowed.
        let at_floor = engine.check(&intent("EURUSD", dec!(1), dec!(1)), &ctx(&[], &[], dec!(-500)));
        assert!(at_floor.allow);
    }

    #[test]
    fn test_zero_balance_rejected() {
        let engine = RiskEngine::new(limits());
        let mut c = ctx(&[], &[], dec!(0));
        c.balance = dec!(0);
        let d = engine.check(&intent("EURUSD", dec!(1), dec!(1)), &c);
        assert_eq!(d.reason.unwrap().limit_name(), "balance_unavailable");
    }

    #[test]
    fn test_rate_limit_trailing_hour() {
        let engine = RiskEngine::new(limits());
        let now = Utc::now();
        let old = now - Duration::minutes(61);
        let trades = vec![old, old, now - Duration::minutes(5), now - Duration::minutes(1)];
        let mut c = ctx(&[], &trades, dec!(0));
        c.now = now;
        assert!(engine.check(&intent("X", dec!(1), dec!(1)), &c).allow);

        let trades = vec![now, now - Duration::minutes(10), now - Duration::minutes(59)];
        let mut c = ctx(&[], &trades, dec!(0));
        c.now = now;
        let d = engine.check(&intent("X", dec!(1), dec!(1)), &c);
        assert_eq!(d.reason, Some(RiskRejection::RateLimit { trades: 3, max: 3 }));
    }

    #[test]
    fn test_order_size_ceiling() {
        let engine = RiskEngine::new(limits());
        let d = engine.check(&intent("X", dec!(11), dec!(1)), &ctx(&[], &[], dec!(0)));
        assert_eq!(d.reason.unwrap().limit_name(), "order_size");
    }

    #[test]
    fn test_dealing_rules_min_size_and_step() {
        let mut l = limits();
        l.dealing_rules.insert(
            "EURUSD".to_string(),
            DealingRules {
                symbol: "EURUSD".to_string(),
                min_size: Some(Size::new(dec!(0.5))),
                size_step: Some(Size::new(dec!(0.1))),
            },
        );
        let engine = RiskEngine::new(l);
        let c = ctx(&[], &[], dec!(0));

        let small = engine.check(&intent("EURUSD", dec!(0.4), dec!(1)), &c);
        assert_eq!(
            small.reason,
            Some(RiskRejection::BelowMinSize {
                symbol: "EURUSD".to_string(),
                size: Size::new(dec!(0.4)),
                min: Size::new(dec!(0.5)),
            })
        );

        let off_step = engine.check(&intent("EURUSD", dec!(1.25), dec!(1)), &c);
        let reason = off_step.reason.unwrap();
        assert_eq!(reason.limit_name(), "size_step");
        assert!(reason.to_string().contains("0.1"));

        assert!(engine.check(&intent("EURUSD", dec!(1.3), dec!(1)), &c).allow);
        assert!(engine.check(&intent("EURUSD", dec!(0.5), dec!(1)), &c).allow);
        // Symbols without rules are unconstrained.
        assert!(engine.check(&intent("GBPUSD", dec!(0.01), dec!(1)), &c).allow);
    }

    #[test]
    fn test_stop_loss_required_for_opens_only() {
        let mut l = limits();
        l.require_stop_loss = true;
        let engine = RiskEngine::new(l);
        let c = ctx(&[], &[], dec!(0));

        let bare = engine.check(&intent("EURUSD", dec!(1), dec!(1)), &c);
        let reason = bare.reason.unwrap();
        assert_eq!(reason, RiskRejection::StopLossRequired);
        assert_eq!(reason.to_string(), "Stop loss is required but not provided");

        let stopped = intent("EURUSD", dec!(1), dec!(1)).with_stops(Some(Price::new(dec!(0.9))), None);
        assert!(engine.check(&stopped, &c).allow);

        let close = Intent::new("EURUSD", Direction::Sell, Size::new(dec!(1)), "t", Utc::now())
            .closing(OrderId::new("SOLAT_EURUSD_1"));
        assert!(engine.check(&close, &c).allow);

        // Off by default.
        let lenient = RiskEngine::new(limits());
        assert!(lenient.check(&intent("EURUSD", dec!(1), dec!(1)), &c).allow);
    }

    #[test]
    fn test_check_order_short_circuits() {
        // Breaches both exposure and daily loss: exposure is reported.
        let engine = RiskEngine::new(limits());
        let d = engine.check(&intent("X", dec!(5), dec!(1000)), &ctx(&[], &[], dec!(-9000)));
        assert_eq!(d.reason.unwrap().limit_name(), "exposure_cap");
    }

    #[test]
    fn test_check_is_pure() {
        let engine = RiskEngine::new(limits());
        let positions = vec![position("EURUSD", dec!(3), dec!(100))];
        let now = Utc::now();
        let trades = vec![now - Duration::minutes(3)];
        let i = intent("EURUSD", dec!(2), dec!(100));
        let c = RiskContext {
            balance: dec!(5000),
            open_positions: &positions,
            realized_pnl_today: dec!(-20),
            recent_trades: &trades,
            now,
        };
        let first = engine.check(&i, &c);
        for _ in 0..10 {
            assert_eq!(engine.check(&i, &c), first);
        }
    }
}
