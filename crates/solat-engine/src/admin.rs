//! Offline operator commands.
//!
//! These act on files directly and are meant for a stopped engine. A running
//! router keeps its own in-memory copy of the kill switch.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use solat_persistence::read_entries;
use solat_risk::{KillSwitch, KillSwitchReason, KillSwitchState};

use crate::error::AppResult;

pub fn kill_switch_status(path: &Path) -> AppResult<KillSwitchState> {
    Ok(KillSwitch::restore(path)?.state().clone())
}

pub fn activate_kill_switch(path: &Path, reason: &str) -> AppResult<KillSwitchState> {
    let mut kill_switch = KillSwitch::restore(path)?;
    kill_switch.activate(KillSwitchReason::manual(reason), Utc::now())?;
    Ok(kill_switch.state().clone())
}

/// Returns whether the switch was active.
pub fn reset_kill_switch(path: &Path) -> AppResult<bool> {
    let mut kill_switch = KillSwitch::restore(path)?;
    let changed = kill_switch.reset(Utc::now())?;
    info!(path = %path.display(), changed, "Kill switch reset from CLI");
    Ok(changed)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSummary {
    pub entries: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    /// Highest sequence number seen.
    pub last_seq: Option<u64>,
    pub torn_tail: bool,
}

pub fn inspect_ledger(path: &Path) -> AppResult<LedgerSummary> {
    let readout = read_entries(path)?;
    let mut summary = LedgerSummary {
        entries: readout.entries.len(),
        torn_tail: readout.torn_tail,
        ..LedgerSummary::default()
    };
    for entry in &readout.entries {
        *summary.by_kind.entry(entry.event.kind()).or_default() += 1;
        summary.first_ts.get_or_insert(entry.ts);
        summary.last_ts = Some(entry.ts);
        summary.last_seq = summary.last_seq.max(Some(entry.seq));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    use rust_decimal_macros::dec;
    use solat_core::{Direction, Intent, Size, TradingMode};
    use solat_persistence::{Ledger, LedgerEvent, LedgerSink};

    #[test]
    fn test_cli_kill_switch_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ks.json");
        assert!(!kill_switch_status(&path).unwrap().active);

        let state = activate_kill_switch(&path, "operator stop").unwrap();
        assert!(state.active);
        assert!(kill_switch_status(&path).unwrap().active);

        assert!(reset_kill_switch(&path).unwrap());
        assert!(!kill_switch_status(&path).unwrap().active);
        assert!(!reset_kill_switch(&path).unwrap());
    }

    #[test]
    fn test_inspect_counts_kinds_and_torn_tail() {
        let dir = TempDir::new().unwrap();
        let mut ledger =
            Ledger::open(dir.path(), TradingMode::Demo, serde_json::json!({}), 10).unwrap();
        for _ in 0..3 {
            let intent =
                Intent::new("EURUSD", Direction::Buy, Size::new(dec!(1)), "cli", Utc::now());
            ledger.append(LedgerEvent::IntentLogged { intent }).unwrap();
        }
        let path = ledger.ledger_path();
        drop(ledger);

        let clean = inspect_ledger(&path).unwrap();
        assert_eq!(clean.entries, 3);
        assert_eq!(clean.by_kind.get("intent_logged"), Some(&3));
        assert_eq!(clean.last_seq, Some(2));
        assert!(!clean.torn_tail);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":3,").unwrap();
        assert!(inspect_ledger(&path).unwrap().torn_tail);
    }
}
