//! Metrics and structured logging for the execution core.
//!
//! - Prometheus counters for intents, risk rejections, gate blocks, drift
//! - Gauges for kill switch and open positions
//! - Structured logging via tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
