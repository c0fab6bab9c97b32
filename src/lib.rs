//! In-memory, append-only columnar store for semi-structured event rows.
//!
//! Rows of integer and string fields, each carrying a `ts` timestamp, are
//! compacted into immutable dictionary-encoded blocks by a background
//! writer; queries filter blocks through row bitmaps and answer row
//! projections, groupby aggregations, and time-bucketed counts.

pub mod engine;
pub mod errors;
pub mod ingest;
pub mod mem_store;

mod bitvec;
mod options;
mod scheduler;

pub use crate::engine::api::{
    AggOp, ColumnMeta, Filter, FilterOp, RowsQuery, RowsQueryResult, Status, TableInfo,
    TableQuery, TableQueryResult, TimeGran, TimelineBucket, TimelineQuery, TimelineQueryResult,
    TimelineSeries,
};
pub use crate::errors::{IngestError, StoreError};
pub use crate::ingest::raw_row::RawRow;
pub use crate::mem_store::columns::{ColumnType, TS_COLUMN_NAME};
pub use crate::mem_store::strings::StrId;
pub use crate::mem_store::table::Table;
pub use crate::options::Options;
