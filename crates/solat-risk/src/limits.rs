//! Risk limit configuration.
//!
//! `RiskLimitsConfig` is what the operator wrote; every field is optional so
//! that LIVE can tell an omitted limit from a chosen one. `RiskLimits` is the
//! resolved, fully-populated form the engine runs on.
//!
//! `require_stop_loss` and the per-symbol dealing rules are opt-in and are
//! not part of the set LIVE insists on.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use solat_core::{Size, TradingMode};

use crate::error::{RiskError, RiskResult};

/// Limits as configured. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitsConfig {
    /// Max notional per symbol across open positions and the new intent.
    #[serde(default)]
    pub per_symbol_exposure_cap: Option<Decimal>,
    #[serde(default)]
    pub max_concurrent_positions: Option<u32>,
    /// Percent of balance, e.g. `5.0` for 5%.
    #[serde(default)]
    pub max_daily_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub max_trades_per_hour: Option<u32>,
    /// Ceiling for a single order. Mandatory for LIVE.
    #[serde(default)]
    pub max_order_size: Option<Size>,
    /// Reject opening intents that carry no stop loss.
    #[serde(default)]
    pub require_stop_loss: bool,
    /// Broker size rules, listed as an array of tables so symbols keep
    /// their case.
    #[serde(default)]
    pub dealing_rules: Vec<DealingRules>,
}

/// Size constraints the broker applies to one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealingRules {
    pub symbol: String,
    #[serde(default)]
    pub min_size: Option<Size>,
    /// Sizes must be a whole multiple of this.
    #[serde(default)]
    pub size_step: Option<Size>,
}

impl RiskLimitsConfig {
    /// A config with every limit set to the DEMO defaults.
    #[must_use]
    pub fn fully_specified() -> Self {
        let d = RiskLimits::default();
        Self {
            per_symbol_exposure_cap: Some(d.per_symbol_exposure_cap),
            max_concurrent_positions: Some(d.max_concurrent_positions),
            max_daily_loss_pct: Some(d.max_daily_loss_pct),
            max_trades_per_hour: Some(d.max_trades_per_hour),
            max_order_size: Some(d.max_order_size),
            ..Self::default()
        }
    }

    /// Names of the limits that are not set.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.per_symbol_exposure_cap.is_none() {
            missing.push("per_symbol_exposure_cap");
        }
        if self.max_concurrent_positions.is_none() {
            missing.push("max_concurrent_positions");
        }
        if self.max_daily_loss_pct.is_none() {
            missing.push("max_daily_loss_pct");
        }
        if self.max_trades_per_hour.is_none() {
            missing.push("max_trades_per_hour");
        }
        if self.max_order_size.is_none() {
            missing.push("max_order_size");
        }
        missing
    }

    /// Resolve into concrete limits.
    ///
    /// LIVE never falls back to a default: any missing limit is an error.
    /// DEMO fills gaps from [`RiskLimits::default`] and logs each one.
    pub fn resolve(&self, mode: TradingMode) -> RiskResult<RiskLimits> {
        let missing = self.missing();
        if mode.is_live() && !missing.is_empty() {
            return Err(RiskError::ConfigError(format!(
                "LIVE mode requires explicit risk limits, missing: {}",
                missing.join(", ")
            )));
        }
        for name in &missing {
            warn!(limit = name, "Risk limit not configured, using DEMO default");
        }

        let d = RiskLimits::default();
        let limits = RiskLimits {
            per_symbol_exposure_cap: self
                .per_symbol_exposure_cap
                .unwrap_or(d.per_symbol_exposure_cap),
            max_concurrent_positions: self
                .max_concurrent_positions
                .unwrap_or(d.max_concurrent_positions),
            max_daily_loss_pct: self.max_daily_loss_pct.unwrap_or(d.max_daily_loss_pct),
            max_trades_per_hour: self.max_trades_per_hour.unwrap_or(d.max_trades_per_hour),
            max_order_size: self.max_order_size.unwrap_or(d.max_order_size),
            require_stop_loss: self.require_stop_loss,
            dealing_rules: self
                .dealing_rules
                .iter()
                .map(|rules| (rules.symbol.clone(), rules.clone()))
                .collect(),
        };
        limits.validate()?;
        Ok(limits)
    }
}

/// Resolved limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub per_symbol_exposure_cap: Decimal,
    pub max_concurrent_positions: u32,
    pub max_daily_loss_pct: Decimal,
    pub max_trades_per_hour: u32,
    pub max_order_size: Size,
    pub require_stop_loss: bool,
    /// Keyed by symbol.
    pub dealing_rules: BTreeMap<String, DealingRules>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            per_symbol_exposure_cap: Decimal::from(10_000),
            max_concurrent_positions: 5,
            max_daily_loss_pct: Decimal::from(5),
            max_trades_per_hour: 20,
            max_order_size: Size::new(Decimal::ONE),
            require_stop_loss: false,
            dealing_rules: BTreeMap::new(),
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> RiskResult<()> {
        if self.per_symbol_exposure_cap <= Decimal::ZERO {
            return Err(RiskError::ConfigError(
                "per_symbol_exposure_cap must be positive".to_string(),
            ));
        }
        if self.max_daily_loss_pct <= Decimal::ZERO || self.max_daily_loss_pct > Decimal::from(100)
        {
            return Err(RiskError::ConfigError(
                "max_daily_loss_pct must be in (0, 100]".to_string(),
            ));
        }
        if !self.max_order_size.is_positive() {
            return Err(RiskError::ConfigError(
                "max_order_size must be positive".to_string(),
            ));
        }
        for rules in self.dealing_rules.values() {
            if rules.size_step.is_some_and(|step| !step.is_positive()) {
                return Err(RiskError::ConfigError(format!(
                    "dealing_rules.size_step for {} must be positive",
                    rules.symbol
                )));
            }
            if rules.min_size.is_some_and(|min| min.inner() < Decimal::ZERO) {
                return Err(RiskError::ConfigError(format!(
                    "dealing_rules.min_size for {} must not be negative",
                    rules.symbol
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_live_refuses_defaults() {
        let cfg = RiskLimitsConfig {
            max_order_size: Some(Size::new(dec!(0.5))),
            ..Default::default()
        };
        let err = cfg.resolve(TradingMode::Live).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("per_symbol_exposure_cap"));
        assert!(msg.contains("max_trades_per_hour"));
        assert!(!msg.contains("max_order_size"));
    }

    #[test]
    fn test_demo_fills_defaults() {
        let cfg = RiskLimitsConfig {
            max_concurrent_positions: Some(2),
            ..Default::default()
        };
        let limits = cfg.resolve(TradingMode::Demo).unwrap();
        assert_eq!(limits.max_concurrent_positions, 2);
        assert_eq!(limits.max_trades_per_hour, 20);
        assert_eq!(limits.per_symbol_exposure_cap, dec!(10000));
    }

    #[test]
    fn test_fully_specified_resolves_for_live() {
        let limits = RiskLimitsConfig::fully_specified()
            .resolve(TradingMode::Live)
            .unwrap();
        assert_eq!(limits, RiskLimits::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cfg = RiskLimitsConfig {
            max_daily_loss_pct: Some(dec!(0)),
            ..RiskLimitsConfig::fully_specified()
        };
        assert!(cfg.resolve(TradingMode::Demo).is_err());
    }

    #[test]
    fn test_dealing_rules_keyed_by_symbol_and_validated() {
        let rules = DealingRules {
            symbol: "EURUSD".to_string(),
            min_size: Some(Size::new(dec!(0.1))),
            size_step: Some(Size::new(dec!(0.1))),
        };
        let cfg = RiskLimitsConfig {
            require_stop_loss: true,
            dealing_rules: vec![rules.clone()],
            ..RiskLimitsConfig::fully_specified()
        };
        let limits = cfg.resolve(TradingMode::Live).unwrap();
        assert!(limits.require_stop_loss);
        assert_eq!(limits.dealing_rules.get("EURUSD"), Some(&rules));

        let bad = RiskLimitsConfig {
            dealing_rules: vec![DealingRules {
                size_step: Some(Size::ZERO),
                ..rules
            }],
            ..RiskLimitsConfig::fully_specified()
        };
        assert!(bad.resolve(TradingMode::Demo).is_err());
    }
}
