//! Position snapshots buffered in memory and flushed to Parquet.
//!
//! The buffer is cleared only after the store reports success. On failure
//! every snapshot stays buffered and the next flush retries all of them.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use solat_core::OpenPosition;

use crate::error::PersistenceResult;

/// All open positions at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub ts: DateTime<Utc>,
    pub positions: Vec<OpenPosition>,
}

impl PositionSnapshot {
    #[must_use]
    pub fn gross_notional(&self) -> Decimal {
        self.positions.iter().map(OpenPosition::notional).sum()
    }
}

// ============================================================================
// SnapshotStore
// ============================================================================

/// Columnar sink for snapshot batches.
pub trait SnapshotStore: Send {
    /// Persist every snapshot in `batch`. Returns rows written.
    fn write(&mut self, batch: &[PositionSnapshot]) -> PersistenceResult<usize>;
}

/// Writes one Parquet file per flush under `dir`.
#[derive(Debug)]
pub struct ParquetSnapshotStore {
    dir: PathBuf,
    next_part: u64,
    schema: SchemaRef,
}

impl ParquetSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let next_part = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "parquet"))
            .count() as u64;
        Ok(Self {
            dir,
            next_part,
            schema: Arc::new(Self::schema()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("snapshot_ts_ms", DataType::Int64, false),
            Field::new("order_id", DataType::Utf8, false),
            Field::new("symbol", DataType::Utf8, false),
            Field::new("direction", DataType::Utf8, false),
            Field::new("size", DataType::Float64, false),
            Field::new("entry_price", DataType::Float64, false),
            Field::new("opened_at_ms", DataType::Int64, false),
        ])
    }

    fn to_batch(&self, batch: &[PositionSnapshot]) -> PersistenceResult<RecordBatch> {
        let rows = batch.iter().map(|s| s.positions.len()).sum();
        let mut ts = Vec::with_capacity(rows);
        let mut order_ids = Vec::with_capacity(rows);
        let mut symbols = Vec::with_capacity(rows);
        let mut directions = Vec::with_capacity(rows);
        let mut sizes = Vec::with_capacity(rows);
        let mut prices = Vec::with_capacity(rows);
        let mut opened = Vec::with_capacity(rows);

        for snapshot in batch {
            for p in &snapshot.positions {
                ts.push(snapshot.ts.timestamp_millis());
                order_ids.push(p.order_id.to_string());
                symbols.push(p.symbol.clone());
                directions.push(p.direction.to_string());
                sizes.push(p.size.inner().to_f64().unwrap_or(f64::NAN));
                prices.push(p.entry_price.inner().to_f64().unwrap_or(f64::NAN));
                opened.push(p.opened_at.timestamp_millis());
            }
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(ts)),
            Arc::new(StringArray::from(order_ids)),
            Arc::new(StringArray::from(symbols)),
            Arc::new(StringArray::from(directions)),
            Arc::new(Float64Array::from(sizes)),
            Arc::new(Float64Array::from(prices)),
            Arc::new(Int64Array::from(opened)),
        ];
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    fn write_file(&self, path: &Path, batch: &RecordBatch) -> PersistenceResult<()> {
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }
}

impl SnapshotStore for ParquetSnapshotStore {
    fn write(&mut self, batch: &[PositionSnapshot]) -> PersistenceResult<usize> {
        let record_batch = self.to_batch(batch)?;
        let rows = record_batch.num_rows();
        if rows == 0 {
            return Ok(0);
        }

        let final_path = self
            .dir
            .join(format!("positions_{:06}.parquet", self.next_part));
        let temp_path = final_path.with_extension("parquet.tmp");

        if let Err(e) = self.write_file(&temp_path, &record_batch) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, &final_path)?;
        self.next_part += 1;

        debug!(path = %final_path.display(), rows, "Wrote snapshot parquet");
        Ok(rows)
    }
}

// ============================================================================
// SnapshotBuffer
// ============================================================================

pub struct SnapshotBuffer<S: SnapshotStore> {
    store: S,
    buffer: Vec<PositionSnapshot>,
    flush_every: usize,
    flushes: u64,
}

impl<S: SnapshotStore> SnapshotBuffer<S> {
    pub fn new(store: S, flush_every: usize) -> Self {
        let flush_every = flush_every.max(1);
        Self {
            store,
            buffer: Vec::with_capacity(flush_every),
            flush_every,
            flushes: 0,
        }
    }

    pub fn push(&mut self, snapshot: PositionSnapshot) {
        self.buffer.push(snapshot);
    }

    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_every
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Successful flushes so far.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Write everything buffered. Returns the number of snapshots flushed.
    pub fn flush(&mut self) -> PersistenceResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        match self.store.write(&self.buffer) {
            Ok(rows) => {
                let flushed = self.buffer.len();
                self.buffer.clear();
                self.flushes += 1;
                info!(snapshots = flushed, rows, "Flushed position snapshots");
                Ok(flushed)
            }
            Err(e) => {
                warn!(error = %e, retained = self.buffer.len(), "Snapshot flush failed, buffer retained");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, OrderId, Price, Size};
    use tempfile::TempDir;

    fn snapshot(n: usize) -> PositionSnapshot {
        PositionSnapshot {
            ts: Utc::now(),
            positions: (0..n)
                .map(|i| OpenPosition {
                    order_id: OrderId::new(format!("SOLAT_{i}")),
                    symbol: "EURUSD".to_string(),
                    direction: Direction::Buy,
                    size: Size::new(dec!(0.1)),
                    entry_price: Price::new(dec!(1.1)),
                    opened_at: Utc::now(),
                })
                .collect(),
        }
    }

    /// Fails until `fail` is cleared.
    struct FlakyStore {
        fail: bool,
        written: usize,
    }

    impl SnapshotStore for FlakyStore {
        fn write(&mut self, batch: &[PositionSnapshot]) -> PersistenceResult<usize> {
            if self.fail {
                return Err(PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.written += batch.len();
            Ok(batch.len())
        }
    }

    #[test]
    fn test_buffer_bounded_across_flush_cycles() {
        let store = FlakyStore {
            fail: false,
            written: 0,
        };
        let mut buf = SnapshotBuffer::new(store, 5);
        for _cycle in 0..50 {
            for _ in 0..5 {
                buf.push(snapshot(2));
            }
            assert!(buf.should_flush());
            assert_eq!(buf.flush().unwrap(), 5);
            assert_eq!(buf.len(), 0);
        }
        assert_eq!(buf.flushes(), 50);
        assert_eq!(buf.store.written, 250);
    }

    #[test]
    fn test_failed_flush_retains_then_retries() {
        let store = FlakyStore {
            fail: true,
            written: 0,
        };
        let mut buf = SnapshotBuffer::new(store, 2);
        buf.push(snapshot(1));
        buf.push(snapshot(1));
        assert!(buf.flush().is_err());
        assert_eq!(buf.len(), 2);

        buf.push(snapshot(1));
        buf.store.fail = false;
        assert_eq!(buf.flush().unwrap(), 3);
        assert!(buf.is_empty());
        assert_eq!(buf.store.written, 3);
    }

    #[test]
    fn test_parquet_parts_are_readable() {
        let dir = TempDir::new().unwrap();
        let mut store = ParquetSnapshotStore::new(dir.path().join("snapshots")).unwrap();
        assert_eq!(store.write(&[snapshot(3), snapshot(2)]).unwrap(), 5);
        assert_eq!(store.write(&[snapshot(0)]).unwrap(), 0);
        assert_eq!(store.write(&[snapshot(1)]).unwrap(), 1);

        let first = store.dir().join("positions_000000.parquet");
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(first).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 5);
        assert!(store.dir().join("positions_000001.parquet").exists());

        // Reopening continues numbering after existing parts.
        let reopened = ParquetSnapshotStore::new(store.dir()).unwrap();
        assert_eq!(reopened.next_part, 2);
    }
}
