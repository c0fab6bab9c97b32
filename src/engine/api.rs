use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mem_store::columns::ColumnType;
use crate::mem_store::strings::StrId;

pub use crate::mem_store::filter::FilterOp;

/// Aggregation operators for table queries. `TimelineCount` is reserved for
/// timeline queries, which set it internally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggOp {
    #[default]
    Count,
    CountDistinct,
    Sum,
    Avg,
    TimelineCount,
}

/// Fixed timeline bucket widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeGran {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Hour12,
    Day1,
}

impl TimeGran {
    pub fn secs(self) -> i64 {
        match self {
            TimeGran::Min1 => 60,
            TimeGran::Min5 => 300,
            TimeGran::Min15 => 900,
            TimeGran::Min30 => 1800,
            TimeGran::Hour1 => 3600,
            TimeGran::Hour4 => 4 * 3600,
            TimeGran::Hour12 => 12 * 3600,
            TimeGran::Day1 => 24 * 3600,
        }
    }
}

/// Status accompanying every reply of the RPC surface built on top of this
/// engine. Queries that return no result map to `NoContent`, ingestion
/// acknowledgements to `Accepted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Accepted,
    NoContent,
}

/// One predicate over a single column. Exactly one of `int_val`/`str_val`
/// is set for comparison ops, matching the column's type; presence ops
/// (`Null`/`Nonnull`) carry no value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Filter {
    pub column_name: String,
    pub op: FilterOp,
    #[serde(default)]
    pub int_val: Option<i64>,
    #[serde(default)]
    pub str_val: Option<String>,
}

impl Filter {
    pub fn int(column_name: &str, op: FilterOp, value: i64) -> Filter {
        Filter {
            column_name: column_name.to_string(),
            op,
            int_val: Some(value),
            str_val: None,
        }
    }

    pub fn str(column_name: &str, op: FilterOp, value: &str) -> Filter {
        Filter {
            column_name: column_name.to_string(),
            op,
            int_val: None,
            str_val: Some(value.to_string()),
        }
    }

    pub fn presence(column_name: &str, op: FilterOp) -> Filter {
        Filter {
            column_name: column_name.to_string(),
            op,
            int_val: None,
            str_val: None,
        }
    }
}

/// Row-level projection with filtering. At least one of the two column-name
/// lists must be non-empty. A missing `max_ts` defaults to the current
/// wall-clock unix seconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RowsQuery {
    pub min_ts: i64,
    #[serde(default)]
    pub max_ts: Option<i64>,
    #[serde(default)]
    pub int_filters: Vec<Filter>,
    #[serde(default)]
    pub str_filters: Vec<Filter>,
    #[serde(default)]
    pub int_column_names: Vec<String>,
    #[serde(default)]
    pub str_column_names: Vec<String>,
}

/// Groupby aggregation. `agg_int_column_names` must be non-empty and
/// `agg_op` must not be `TimelineCount`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableQuery {
    pub min_ts: i64,
    #[serde(default)]
    pub max_ts: Option<i64>,
    #[serde(default)]
    pub int_filters: Vec<Filter>,
    #[serde(default)]
    pub str_filters: Vec<Filter>,
    #[serde(default)]
    pub groupby_int_column_names: Vec<String>,
    #[serde(default)]
    pub groupby_str_column_names: Vec<String>,
    pub agg_int_column_names: Vec<String>,
    pub agg_op: AggOp,
}

/// Time-bucketed groupby count. Buckets are `(ts - min_ts) / gran`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineQuery {
    pub min_ts: i64,
    #[serde(default)]
    pub max_ts: Option<i64>,
    #[serde(default)]
    pub int_filters: Vec<Filter>,
    #[serde(default)]
    pub str_filters: Vec<Filter>,
    #[serde(default)]
    pub groupby_int_column_names: Vec<String>,
    #[serde(default)]
    pub groupby_str_column_names: Vec<String>,
    pub gran: TimeGran,
}

/// Reply of a rows query. All matrices are column-major flat buffers: the
/// value for `(row i, col c)` of an N-row result lives at `c * N + i`, with
/// a parallel has-value buffer encoding per-cell presence. String cells hold
/// string ids; `str_id_map` resolves every id referenced anywhere in the
/// reply.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RowsQueryResult {
    pub count: usize,
    pub int_column_names: Vec<String>,
    pub int_result: Vec<i64>,
    pub int_has_value: Vec<bool>,
    pub str_column_names: Vec<String>,
    pub str_id_map: HashMap<StrId, String>,
    pub str_result: Vec<StrId>,
    pub str_has_value: Vec<bool>,
}

/// Reply of a groupby aggregation: one row per group, groupby columns laid
/// out like a rows reply, plus the aggregated results — int-typed ops
/// (count, count-distinct, sum) in `agg_int_result`, float-typed ops (avg)
/// in `agg_float_result`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TableQueryResult {
    pub count: usize,
    pub int_column_names: Vec<String>,
    pub int_result: Vec<i64>,
    pub int_has_value: Vec<bool>,
    pub str_column_names: Vec<String>,
    pub str_id_map: HashMap<StrId, String>,
    pub str_result: Vec<StrId>,
    pub str_has_value: Vec<bool>,
    pub agg_int_column_names: Vec<String>,
    pub agg_int_result: Vec<i64>,
    pub agg_int_has_value: Vec<bool>,
    pub agg_float_column_names: Vec<String>,
    pub agg_float_result: Vec<f64>,
    pub agg_float_has_value: Vec<bool>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineBucket {
    pub ts_bucket: i64,
    pub count: i64,
}

/// Per-group timeline: `(bucket, count)` pairs ordered by bucket.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineSeries {
    pub buckets: Vec<TimelineBucket>,
}

/// Reply of a timeline query: groupby columns as in a table query reply,
/// plus one ordered series per group.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimelineQueryResult {
    pub count: usize,
    pub int_column_names: Vec<String>,
    pub int_result: Vec<i64>,
    pub int_has_value: Vec<bool>,
    pub str_column_names: Vec<String>,
    pub str_id_map: HashMap<StrId, String>,
    pub str_result: Vec<StrId>,
    pub str_has_value: Vec<bool>,
    pub timelines: Vec<TimelineSeries>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub col_type: ColumnType,
}

/// Table name, row count, ts range, and the descriptors of every registered
/// column. The ts range is `None` until the first block lands.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub columns: Vec<ColumnMeta>,
}
