use thiserror::Error;

use crate::mem_store::columns::ColumnType;

/// Row-level validation failures. The offending row is dropped and logged;
/// ingestion continues with the next row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("missing or invalid ts: {0}")]
    InvalidTs(i64),
    #[error("string dictionary is full, max: {0}")]
    DictionaryFull(u32),
    #[error("too many columns, max: {0}")]
    TooManyColumns(u16),
    #[error("column type mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ColumnTypeMismatch {
        name: String,
        expected: ColumnType,
        actual: ColumnType,
    },
}

/// Failures while turning a partial block into an immutable block, and
/// invariant breaches detected inside block storage. These indicate a bug
/// rather than bad input; the current request is aborted but the process
/// keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("partial block has no rows")]
    EmptyBlock,
    #[error("numeric store invariant violated: {0}")]
    InvariantViolated(String),
}
