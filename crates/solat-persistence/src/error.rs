//! Error types for persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A line that is not the final one failed to parse.
    #[error("Corrupt ledger line {line}: {detail}")]
    Corrupt { line: usize, detail: String },

    #[error("Ledger already finalized")]
    Finalized,

    /// A failed append could not be rolled back; the file tail is unknown.
    #[error("Ledger poisoned after unrecoverable append failure")]
    Poisoned,
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
