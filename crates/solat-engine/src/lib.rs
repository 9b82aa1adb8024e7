//! Execution safety engine.
//!
//! Wires the core together and owns startup sequencing:
//! - Layered configuration (TOML file, then `SOLAT__` environment)
//! - Kill switch restored before the router exists
//! - One ledger run directory per process
//! - Background reconciliation and snapshot flushing
//! - Offline operator commands for the kill switch and ledger

pub mod admin;
pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, MarkConfig, PaperBrokerConfig, PersistenceConfig};
pub use error::{AppError, AppResult};
