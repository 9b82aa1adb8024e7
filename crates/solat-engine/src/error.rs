//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Gate(#[from] solat_gate::ConfigError),

    #[error("Risk error: {0}")]
    Risk(#[from] solat_risk::RiskError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] solat_persistence::PersistenceError),

    #[error("Executor error: {0}")]
    Executor(#[from] solat_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] solat_telemetry::TelemetryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
