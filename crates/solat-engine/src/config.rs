//! Application configuration.
//!
//! Loaded from a TOML file and then `SOLAT__`-prefixed environment variables,
//! with `__` separating nested keys:
//!
//! ```text
//! SOLAT__MODE=LIVE
//! SOLAT__LIVE__LIVE_TRADING_ENABLED=true
//! SOLAT__ALLOWLIST=EURUSD,GBPUSD
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use solat_core::{Price, TradingMode};
use solat_executor::ExecutionConfig;
use solat_gate::{Gate, LiveGateConfig};
use solat_risk::{RiskLimits, RiskLimitsConfig};

use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "SOLAT";

/// Ledger and kill switch locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Each run gets its own directory under here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_kill_switch_path")]
    pub kill_switch_path: PathBuf,
    /// Buffered snapshots that trigger a columnar flush. Default: 20.
    #[serde(default = "default_snapshot_flush_every")]
    pub snapshot_flush_every: usize,
    /// Periodic flush regardless of buffer size (s). Default: 60.
    #[serde(default = "default_snapshot_flush_interval_s")]
    pub snapshot_flush_interval_s: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/runs")
}

fn default_kill_switch_path() -> PathBuf {
    PathBuf::from("data/kill_switch.json")
}

fn default_snapshot_flush_every() -> usize {
    20
}

fn default_snapshot_flush_interval_s() -> u64 {
    60
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            kill_switch_path: default_kill_switch_path(),
            snapshot_flush_every: default_snapshot_flush_every(),
            snapshot_flush_interval_s: default_snapshot_flush_interval_s(),
        }
    }
}

/// In-process broker used by `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    #[serde(default = "default_paper_account")]
    pub account_id: String,
    #[serde(default = "default_paper_balance")]
    pub balance: Decimal,
    /// Initial marks used to price fills without a reference price.
    #[serde(default)]
    pub marks: Vec<MarkConfig>,
}

/// Listed as an array of tables: configuration keys are case-folded, symbols
/// must not be.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkConfig {
    pub symbol: String,
    pub price: Price,
}

fn default_paper_account() -> String {
    "PAPER-001".to_string()
}

fn default_paper_balance() -> Decimal {
    Decimal::from(10_000)
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            account_id: default_paper_account(),
            balance: default_paper_balance(),
            marks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Every field optional; LIVE refuses to start with any missing.
    #[serde(default)]
    pub risk: RiskLimitsConfig,
    #[serde(default)]
    pub live: LiveGateConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Merged with `execution.allowlist`.
    #[serde(default)]
    pub allowlist: BTreeSet<String>,
    #[serde(default)]
    pub paper_broker: PaperBrokerConfig,
}

impl AppConfig {
    /// Load `path` and apply environment overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        let builder = Config::builder().add_source(File::new(path, FileFormat::Toml));
        Self::build(builder)
    }

    /// Parse TOML text and apply environment overrides.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let builder = Config::builder().add_source(File::from_str(text, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> AppResult<Self> {
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowlist"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Startup validation.
    ///
    /// LIVE with any unsatisfied static gate or missing risk limit is a
    /// fatal [`solat_gate::ConfigError`]. DEMO logs the same findings and
    /// fills missing limits with defaults.
    pub fn validate(&self) -> AppResult<RiskLimits> {
        Gate::validate_startup(self.mode, &self.live, &self.risk)?;
        let limits = self.risk.resolve(self.mode)?;

        if self.persistence.snapshot_flush_every == 0 {
            return Err(AppError::Config(
                "persistence.snapshot_flush_every must be at least 1".to_string(),
            ));
        }
        if self.execution.reconcile.interval_s == 0 {
            return Err(AppError::Config(
                "execution.reconcile.interval_s must be at least 1".to_string(),
            ));
        }
        if self.allowlist.is_empty() && self.execution.allowlist.is_empty() {
            warn!("Allowlist is empty; every intent will be rejected");
        }
        Ok(limits)
    }

    /// Execution settings with the top-level mode and allowlist applied.
    #[must_use]
    pub fn execution_config(&self) -> ExecutionConfig {
        let mut execution = self.execution.clone();
        execution.mode = self.mode;
        execution.allowlist.extend(self.allowlist.iter().cloned());
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::Size;

    #[test]
    fn test_empty_config_is_demo_with_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.mode, TradingMode::Demo);
        assert_eq!(cfg.persistence.snapshot_flush_every, 20);
        assert_eq!(cfg.paper_broker.account_id, "PAPER-001");
        assert!(!cfg.live.live_trading_enabled);

        let limits = cfg.validate().unwrap();
        assert_eq!(limits, RiskLimits::default());
    }

    #[test]
    fn test_live_without_gates_is_fatal() {
        let cfg = AppConfig::from_toml_str("mode = \"LIVE\"").unwrap();
        match cfg.validate() {
            Err(AppError::Gate(e)) => {
                assert!(e.blockers.iter().any(|b| b.contains("live_trading_enabled")));
            }
            other => panic!("expected gate config error, got {other:?}"),
        }
    }

    #[test]
    fn test_fully_specified_live_validates() {
        let cfg = AppConfig::from_toml_str(
            r#"
            mode = "LIVE"

            [live]
            live_trading_enabled = true
            live_enable_token = "s3cret"
            live_account_id = "ACC-1"

            [risk]
            per_symbol_exposure_cap = 5000
            max_concurrent_positions = 3
            max_daily_loss_pct = 2.5
            max_trades_per_hour = 10
            max_order_size = 0.5
            "#,
        )
        .unwrap();
        let limits = cfg.validate().unwrap();
        assert_eq!(limits.max_daily_loss_pct, dec!(2.5));
        assert_eq!(limits.max_concurrent_positions, 3);
    }

    #[test]
    fn test_allowlists_are_merged() {
        let cfg = AppConfig::from_toml_str(
            r#"
            allowlist = ["EURUSD"]

            [execution]
            allowlist = ["GBPUSD"]
            close_on_kill_switch = true
            "#,
        )
        .unwrap();
        let execution = cfg.execution_config();
        assert!(execution.allowlist.contains("EURUSD"));
        assert!(execution.allowlist.contains("GBPUSD"));
        assert!(execution.close_on_kill_switch);
        assert_eq!(execution.mode, TradingMode::Demo);
    }

    #[test]
    fn test_mark_symbols_keep_case() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [[paper_broker.marks]]
            symbol = "EURUSD"
            price = 1.085
            "#,
        )
        .unwrap();
        assert_eq!(cfg.paper_broker.marks[0].symbol, "EURUSD");
        assert_eq!(cfg.paper_broker.marks[0].price, Price::new(dec!(1.085)));
    }

    #[test]
    fn test_dealing_rules_keep_symbol_case() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [risk]
            require_stop_loss = true

            [[risk.dealing_rules]]
            symbol = "EURUSD"
            min_size = 0.1
            size_step = 0.01
            "#,
        )
        .unwrap();
        let limits = cfg.validate().unwrap();
        assert!(limits.require_stop_loss);
        let rules = &limits.dealing_rules["EURUSD"];
        assert_eq!(rules.min_size, Some(Size::new(dec!(0.1))));
        assert_eq!(rules.size_step, Some(Size::new(dec!(0.01))));
    }

    #[test]
    fn test_zero_flush_cadence_rejected() {
        let cfg = AppConfig::from_toml_str("[persistence]\nsnapshot_flush_every = 0").unwrap();
        assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_token_is_not_serialized() {
        let cfg = AppConfig::from_toml_str("[live]\nlive_enable_token = \"s3cret\"").unwrap();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
