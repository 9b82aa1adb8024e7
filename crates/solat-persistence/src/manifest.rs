//! Run manifest.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solat_core::TradingMode;

use crate::atomic::write_atomic;
use crate::error::PersistenceResult;

/// Describes one ledger run. Written at open and rewritten at finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub mode: TradingMode,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries_written: u64,
    #[serde(default)]
    pub snapshots_flushed: u64,
    /// Effective configuration at startup, secrets excluded.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl RunManifest {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        mode: TradingMode,
        config: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            ended_at: None,
            entries_written: 0,
            snapshots_flushed: 0,
            config,
        }
    }

    pub fn write(&self, path: &Path) -> PersistenceResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> PersistenceResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
