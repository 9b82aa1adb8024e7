//! Append-only JSON Lines ledger.
//!
//! Each entry is serialized to a full line and handed to the kernel in one
//! `write_all` on an `O_APPEND` handle, then `sync_data` runs before the
//! append is reported as successful. No userspace buffering is involved, so
//! a reader never sees half of an acknowledged record.
//!
//! A failed write or sync is cut back to the previous end of file, so the
//! next record never lands behind a partial line. If that truncation fails
//! too, the ledger refuses every further append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use solat_core::TradingMode;

use crate::entry::{LedgerEntry, LedgerEvent};
use crate::error::{PersistenceError, PersistenceResult};
use crate::manifest::RunManifest;
use crate::snapshot::{ParquetSnapshotStore, PositionSnapshot, SnapshotBuffer, SnapshotStore};

const LEDGER_FILE: &str = "ledger.jsonl";
const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_DIR: &str = "snapshots";

// ============================================================================
// LedgerSink
// ============================================================================

/// What the execution router needs from a ledger.
pub trait LedgerSink: Send {
    /// Durably append one event. Returns its sequence number.
    fn append(&mut self, event: LedgerEvent) -> PersistenceResult<u64>;

    /// Append a `Snapshot` entry and buffer the full snapshot for the
    /// columnar store, flushing when the buffer reaches its threshold.
    /// A failed flush is logged and retried later; only the append can fail
    /// this call.
    fn record_snapshot(&mut self, snapshot: PositionSnapshot) -> PersistenceResult<()>;

    /// Flush buffered snapshots now.
    fn flush_snapshots(&mut self) -> PersistenceResult<usize>;

    fn buffered_snapshots(&self) -> usize;

    /// Flush and stamp the manifest. No appends are accepted afterwards.
    fn finalize(&mut self) -> PersistenceResult<()>;
}

// ============================================================================
// Journal file
// ============================================================================

/// Append target that can be cut back to a known length.
trait AppendFile: Write {
    fn end_offset(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendFile for File {
    fn end_offset(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Whole-line appends: a line is either fully written and synced or absent.
struct Journal<F: AppendFile> {
    file: F,
    poisoned: bool,
}

impl<F: AppendFile> Journal<F> {
    fn new(file: F) -> Self {
        Self {
            file,
            poisoned: false,
        }
    }

    fn append_line(&mut self, line: &[u8]) -> PersistenceResult<()> {
        if self.poisoned {
            return Err(PersistenceError::Poisoned);
        }
        let start = self.file.end_offset()?;
        let written = self.file.write_all(line).and_then(|()| self.file.sync());
        let Err(e) = written else {
            return Ok(());
        };

        if let Err(rollback) = self.file.truncate_to(start) {
            error!(offset = start, error = %rollback, "Ledger rollback failed, refusing further appends");
            self.poisoned = true;
        } else {
            warn!(offset = start, "Failed ledger append rolled back");
        }
        Err(e.into())
    }
}

// ============================================================================
// Ledger
// ============================================================================

pub struct Ledger<S: SnapshotStore = ParquetSnapshotStore> {
    run_dir: PathBuf,
    journal: Journal<File>,
    next_seq: u64,
    snapshots: SnapshotBuffer<S>,
    manifest: RunManifest,
    finalized: bool,
}

impl Ledger<ParquetSnapshotStore> {
    /// Create a fresh run directory under `base_dir`.
    pub fn open(
        base_dir: &Path,
        mode: TradingMode,
        config: serde_json::Value,
        snapshot_flush_every: usize,
    ) -> PersistenceResult<Self> {
        let now = Utc::now();
        let run_id = format!(
            "run_{}_{}",
            now.format("%Y%m%dT%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let run_dir = base_dir.join(&run_id);
        let store = ParquetSnapshotStore::new(run_dir.join(SNAPSHOT_DIR))?;
        let manifest = RunManifest::new(run_id, mode, config, now);
        Self::with_store(run_dir, manifest, store, snapshot_flush_every)
    }
}

impl<S: SnapshotStore> Ledger<S> {
    pub fn with_store(
        run_dir: PathBuf,
        manifest: RunManifest,
        store: S,
        snapshot_flush_every: usize,
    ) -> PersistenceResult<Self> {
        fs::create_dir_all(&run_dir)?;
        let ledger_path = run_dir.join(LEDGER_FILE);

        info!(path = %ledger_path.display(), run_id = %manifest.run_id, "Opening ledger (append mode)");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ledger_path)?;
        manifest.write(&run_dir.join(MANIFEST_FILE))?;

        Ok(Self {
            run_dir,
            journal: Journal::new(file),
            next_seq: 0,
            snapshots: SnapshotBuffer::new(store, snapshot_flush_every),
            manifest,
            finalized: false,
        })
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.run_dir.join(LEDGER_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn entries_written(&self) -> u64 {
        self.next_seq
    }
}

impl<S: SnapshotStore> LedgerSink for Ledger<S> {
    fn append(&mut self, event: LedgerEvent) -> PersistenceResult<u64> {
        if self.finalized {
            return Err(PersistenceError::Finalized);
        }
        let seq = self.next_seq;
        let entry = LedgerEntry {
            seq,
            ts: Utc::now(),
            event,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if let Err(e) = self.journal.append_line(&line) {
            error!(seq, kind = entry.event.kind(), error = %e, "Ledger append failed");
            return Err(e);
        }
        self.next_seq += 1;
        Ok(seq)
    }

    fn record_snapshot(&mut self, snapshot: PositionSnapshot) -> PersistenceResult<()> {
        self.append(LedgerEvent::Snapshot {
            position_count: snapshot.positions.len(),
            gross_notional: snapshot.gross_notional(),
        })?;
        self.snapshots.push(snapshot);
        if self.snapshots.should_flush() {
            // Retained on failure; the next threshold or explicit flush retries.
            let _ = self.snapshots.flush();
        }
        Ok(())
    }

    fn flush_snapshots(&mut self) -> PersistenceResult<usize> {
        self.snapshots.flush()
    }

    fn buffered_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    fn finalize(&mut self) -> PersistenceResult<()> {
        if self.finalized {
            return Ok(());
        }
        if let Err(e) = self.snapshots.flush() {
            warn!(error = %e, lost = self.snapshots.len(), "Final snapshot flush failed");
        }
        self.manifest.ended_at = Some(Utc::now());
        self.manifest.entries_written = self.next_seq;
        self.manifest.snapshots_flushed = self.snapshots.flushes();
        self.manifest.write(&self.run_dir.join(MANIFEST_FILE))?;
        self.finalized = true;

        info!(
            run_id = %self.manifest.run_id,
            entries = self.next_seq,
            "Ledger finalized"
        );
        Ok(())
    }
}

impl<S: SnapshotStore> Drop for Ledger<S> {
    fn drop(&mut self) {
        if !self.finalized && !self.snapshots.is_empty() {
            if let Err(e) = self.snapshots.flush() {
                warn!(error = %e, "Failed to flush snapshots on drop");
            }
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LedgerReadout {
    pub entries: Vec<LedgerEntry>,
    /// The file ended in an unterminated, unparseable line (crash mid-append).
    pub torn_tail: bool,
}

/// Read every entry of a ledger file.
///
/// An unterminated final line that does not parse is reported via
/// `torn_tail`. Any other unparseable line is corruption.
pub fn read_entries(path: &Path) -> PersistenceResult<LedgerReadout> {
    let contents = fs::read_to_string(path)?;
    let mut readout = LedgerReadout::default();
    let terminated = contents.ends_with('\n');
    let lines: Vec<&str> = contents.split_terminator('\n').collect();
    let last = lines.len().saturating_sub(1);

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => readout.entries.push(entry),
            Err(_) if idx == last && !terminated => {
                warn!(path = %path.display(), line = idx + 1, "Ledger ends in a torn record, skipping it");
                readout.torn_tail = true;
            }
            Err(e) => {
                return Err(PersistenceError::Corrupt {
                    line: idx + 1,
                    detail: e.to_string(),
                })
            }
        }
    }
    Ok(readout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, Intent, OpenPosition, OrderId, Price, Size};
    use tempfile::TempDir;

    fn open(dir: &TempDir, flush_every: usize) -> Ledger {
        Ledger::open(dir.path(), TradingMode::Demo, serde_json::json!({"k": 1}), flush_every)
            .unwrap()
    }

    fn intent() -> Intent {
        Intent::new("EURUSD", Direction::Buy, Size::new(dec!(1)), "test", Utc::now())
    }

    #[test]
    fn test_append_is_readable_in_order() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir, 10);
        let i = intent();
        assert_eq!(ledger.append(LedgerEvent::IntentLogged { intent: i.clone() }).unwrap(), 0);
        assert_eq!(
            ledger
                .append(LedgerEvent::IntentRejected {
                    intent_id: i.intent_id,
                    kind: "risk".to_string(),
                    reason: "limit".to_string(),
                })
                .unwrap(),
            1
        );

        let readout = read_entries(&ledger.ledger_path()).unwrap();
        assert!(!readout.torn_tail);
        let kinds: Vec<_> = readout.entries.iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds, vec!["intent_logged", "intent_rejected"]);
        assert_eq!(readout.entries[1].seq, 1);
    }

    #[test]
    fn test_torn_tail_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir, 10);
        ledger.append(LedgerEvent::IntentLogged { intent: intent() }).unwrap();
        let path = ledger.ledger_path();
        drop(ledger);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":1,\"ts\":\"2026-").unwrap();

        let readout = read_entries(&path).unwrap();
        assert_eq!(readout.entries.len(), 1);
        assert!(readout.torn_tail);
    }

    #[test]
    fn test_corrupt_middle_line_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        fs::write(&path, "garbage\n{}\n").unwrap();
        assert!(matches!(
            read_entries(&path),
            Err(PersistenceError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn test_snapshots_flush_at_threshold_and_finalize() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir, 3);
        let snap = || PositionSnapshot {
            ts: Utc::now(),
            positions: vec![OpenPosition {
                order_id: OrderId::new("SOLAT_x"),
                symbol: "EURUSD".to_string(),
                direction: Direction::Sell,
                size: Size::new(dec!(1)),
                entry_price: Price::new(dec!(1.2)),
                opened_at: Utc::now(),
            }],
        };
        for _ in 0..7 {
            ledger.record_snapshot(snap()).unwrap();
            assert!(ledger.buffered_snapshots() < 3);
        }
        assert_eq!(ledger.buffered_snapshots(), 1);

        ledger.finalize().unwrap();
        assert_eq!(ledger.buffered_snapshots(), 0);
        assert!(matches!(
            ledger.append(LedgerEvent::IntentLogged { intent: intent() }),
            Err(PersistenceError::Finalized)
        ));

        let manifest = RunManifest::load(&ledger.manifest_path()).unwrap();
        assert_eq!(manifest.entries_written, 7);
        assert_eq!(manifest.snapshots_flushed, 3);
        assert!(manifest.ended_at.is_some());
        assert_eq!(read_entries(&ledger.ledger_path()).unwrap().entries.len(), 7);
    }

    /// In-memory append target that fails after a byte budget.
    #[derive(Default)]
    struct FlakyFile {
        bytes: Vec<u8>,
        write_budget: Option<usize>,
        fail_sync: bool,
        fail_truncate: bool,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.write_budget {
                Some(0) => Err(io::Error::new(io::ErrorKind::Other, "no space left")),
                Some(budget) => {
                    let n = budget.min(buf.len());
                    self.bytes.extend_from_slice(&buf[..n]);
                    self.write_budget = Some(budget - n);
                    Ok(n)
                }
                None => {
                    self.bytes.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendFile for FlakyFile {
        fn end_offset(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.bytes.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_is_rolled_back() {
        let mut journal = Journal::new(FlakyFile::default());
        journal.append_line(b"{\"seq\":0}\n").unwrap();

        journal.file.write_budget = Some(4);
        assert!(journal.append_line(b"{\"seq\":1}\n").is_err());
        assert_eq!(journal.file.bytes, b"{\"seq\":0}\n");

        journal.file.write_budget = None;
        journal.append_line(b"{\"seq\":1}\n").unwrap();
        assert_eq!(journal.file.bytes, b"{\"seq\":0}\n{\"seq\":1}\n");
    }

    #[test]
    fn test_failed_sync_drops_the_record() {
        let mut journal = Journal::new(FlakyFile {
            fail_sync: true,
            ..FlakyFile::default()
        });
        assert!(journal.append_line(b"{\"seq\":0}\n").is_err());
        assert!(journal.file.bytes.is_empty());
        assert!(!journal.poisoned);
    }

    #[test]
    fn test_unrecoverable_failure_poisons_journal() {
        let mut journal = Journal::new(FlakyFile {
            write_budget: Some(3),
            fail_truncate: true,
            ..FlakyFile::default()
        });
        assert!(matches!(
            journal.append_line(b"{\"seq\":0}\n"),
            Err(PersistenceError::Io(_))
        ));

        journal.file.write_budget = None;
        assert!(matches!(
            journal.append_line(b"{\"seq\":1}\n"),
            Err(PersistenceError::Poisoned)
        ));
        assert_eq!(journal.file.bytes.len(), 3);
    }
}
