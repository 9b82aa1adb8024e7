//! Execution ledger persistence.
//!
//! Layout of one run directory:
//! - `ledger.jsonl`: one JSON object per line, each appended with a single
//!   write followed by fsync
//! - `manifest.json`: run metadata, rewritten atomically on finalize
//! - `snapshots/positions_NNNNNN.parquet`: one file per snapshot flush
//!
//! JSON Lines keeps a crash mid-append confined to the final line, which
//! [`read_entries`] detects and skips.

pub mod atomic;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod snapshot;

pub use atomic::write_atomic;
pub use entry::{DriftKind, DriftRecord, LedgerEntry, LedgerEvent};
pub use error::{PersistenceError, PersistenceResult};
pub use ledger::{read_entries, Ledger, LedgerReadout, LedgerSink};
pub use manifest::RunManifest;
pub use snapshot::{ParquetSnapshotStore, PositionSnapshot, SnapshotBuffer, SnapshotStore};
