use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, warn};

use crate::engine::api::{Filter, FilterOp};
use crate::mem_store::block::{Block, BlockFilter, BlockQuery, BlockQueryResult};
use crate::mem_store::columns::ColumnType;
use crate::mem_store::filter::ResolvedFilter;
use crate::mem_store::strings::{StrId, NONEXISTENT_STR_ID};
use crate::mem_store::table::InnerTable;

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// The filtering and projection surface shared by the three query kinds.
/// The int column list is the concatenation the per-query planners build
/// (for aggregations: groupby columns first, aggregated columns after).
pub(crate) struct QuerySpec<'a> {
    pub min_ts: i64,
    pub max_ts: Option<i64>,
    pub int_filters: &'a [Filter],
    pub str_filters: &'a [Filter],
    pub int_column_names: Vec<String>,
    pub str_column_names: &'a [String],
}

/// Plans and executes the block scan for one query: verify the table can
/// have matching rows, resolve filters and projected columns, prune blocks
/// by ts, and run the per-block filter/project. `None` is the query-level
/// not-found: the caller surfaces it as an empty reply.
pub(crate) fn query_blocks(
    table: &InnerTable,
    spec: &QuerySpec,
) -> Option<Vec<BlockQueryResult>> {
    let block_query = plan(table, spec)?;
    let blocks = blocks_to_query(table, block_query.filter.min_ts, block_query.filter.max_ts)?;

    let results: Vec<BlockQueryResult> = blocks
        .iter()
        .filter_map(|block| block.query(&block_query))
        .collect();
    if results.is_empty() {
        return None;
    }
    Some(results)
}

fn plan(table: &InnerTable, spec: &QuerySpec) -> Option<BlockQuery> {
    if !verify_ts_range(table, spec) {
        return None;
    }

    let int_filters = spec
        .int_filters
        .iter()
        .map(|filter| resolve_int_filter(table, filter))
        .collect::<Option<Vec<_>>>()?;
    let str_filters = spec
        .str_filters
        .iter()
        .map(|filter| resolve_str_filter(table, filter))
        .collect::<Option<Vec<_>>>()?;

    let int_columns = table
        .columns()
        .lookup_slice(&spec.int_column_names, ColumnType::Int)?;
    let str_columns = table
        .columns()
        .lookup_slice(spec.str_column_names, ColumnType::Str)?;

    let max_ts = spec.max_ts.unwrap_or_else(unix_now);
    Some(BlockQuery {
        filter: BlockFilter {
            min_ts: spec.min_ts,
            max_ts,
            int_filters,
            str_filters,
        },
        int_columns,
        str_columns,
    })
}

/// The table must have rows and its ts range must intersect the query's.
fn verify_ts_range(table: &InnerTable, spec: &QuerySpec) -> bool {
    if table.row_count() == 0 || table.max_ts() < Some(spec.min_ts) {
        return false;
    }
    if let Some(max_ts) = spec.max_ts {
        if spec.min_ts > max_ts || table.min_ts() > Some(max_ts) {
            return false;
        }
    }
    true
}

fn resolve_int_filter(table: &InnerTable, filter: &Filter) -> Option<ResolvedFilter<i64>> {
    let col = table
        .columns()
        .lookup_assert(&filter.column_name, ColumnType::Int)?;
    let values = match filter.op {
        FilterOp::Null | FilterOp::Nonnull => Vec::new(),
        _ => match filter.int_val {
            Some(value) => vec![value],
            None => {
                warn!(
                    "int value missing for int filter on column {}",
                    filter.column_name
                );
                return None;
            }
        },
    };
    Some(ResolvedFilter {
        col,
        op: filter.op,
        values,
    })
}

fn resolve_str_filter(table: &InnerTable, filter: &Filter) -> Option<ResolvedFilter<StrId>> {
    let col = table
        .columns()
        .lookup_assert(&filter.column_name, ColumnType::Str)?;
    let values = match filter.op {
        FilterOp::Null | FilterOp::Nonnull => Vec::new(),
        _ => match &filter.str_val {
            // A string the dictionary never saw maps to the reserved
            // nonexistent id; the block layer turns that into "matches
            // nothing" or "matches everything" depending on the op.
            Some(value) => vec![table
                .strings()
                .lookup_id(value)
                .unwrap_or(NONEXISTENT_STR_ID)],
            None => {
                warn!(
                    "str value missing for str filter on column {}",
                    filter.column_name
                );
                return None;
            }
        },
    };
    Some(ResolvedFilter {
        col,
        op: filter.op,
        values,
    })
}

/// Snapshots the contiguous run of blocks that can contain rows in
/// `[min_ts, max_ts]`: the block list is sorted by `(min_ts, max_ts)`, so
/// binary searches over `min_ts` bound the run. The read lock is released
/// before any per-block work.
fn blocks_to_query(table: &InnerTable, min_ts: i64, max_ts: i64) -> Option<Vec<Arc<Block>>> {
    let blocks = table.blocks().read().unwrap();

    // first block with min_ts >= query min
    let start = blocks.partition_point(|block| block.min_ts() < min_ts);
    // past the last block with min_ts <= query max
    let end = blocks.partition_point(|block| block.min_ts() <= max_ts);

    if start >= blocks.len() {
        return None;
    }
    if start >= end {
        error!("table block list is not sorted by ts");
        return None;
    }
    Some(blocks[start..end].to_vec())
}
