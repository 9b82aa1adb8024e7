//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tempfile::TempDir;

use solat_core::{Direction, Intent, ManualClock, Price, Size};
use solat_engine::{AppConfig, Application, PersistenceConfig};
use solat_executor::PaperBroker;
use solat_persistence::read_entries;

pub const SYMBOL: &str = "EURUSD";

pub struct Harness {
    pub app: Application,
    pub broker: Arc<PaperBroker>,
    pub clock: Arc<ManualClock>,
}

/// DEMO config rooted in `dir`, with short timeouts for tests.
pub fn demo_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig {
        allowlist: [SYMBOL.to_string()].into_iter().collect(),
        persistence: PersistenceConfig {
            data_dir: dir.join("runs"),
            kill_switch_path: dir.join("kill_switch.json"),
            snapshot_flush_every: 5,
            snapshot_flush_interval_s: 60,
        },
        ..AppConfig::default()
    };
    config.execution.timeouts.submit_ms = 100;
    config.execution.timeouts.read_ms = 500;
    config.execution.sweep.base_delay_ms = 1;
    config.execution.read_retry.base_delay_ms = 1;
    config
}

pub async fn start(config: AppConfig) -> Harness {
    let broker = Arc::new(PaperBroker::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let app = Application::start_with(config, broker.clone(), clock.clone())
        .await
        .unwrap();
    Harness { app, broker, clock }
}

pub async fn start_demo(dir: &TempDir) -> Harness {
    start(demo_config(dir.path())).await
}

pub fn intent(direction: Direction, size: Decimal, price: Decimal) -> Intent {
    Intent::new(SYMBOL, direction, Size::new(size), "test-bot", Utc::now())
        .with_reference_price(Price::new(price))
}

pub fn ledger_kinds(path: &Path) -> Vec<&'static str> {
    read_entries(path)
        .unwrap()
        .entries
        .iter()
        .map(|e| e.event.kind())
        .collect()
}

/// Fail the test instead of hanging.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("test step timed out")
}
