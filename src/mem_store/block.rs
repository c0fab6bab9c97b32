use fnv::FnvHashSet;
use log::{debug, error};

use crate::bitvec::RowBitmap;
use crate::errors::StoreError;
use crate::ingest::ingester::PartialColumns;
use crate::mem_store::columns::ColumnInfo;
use crate::mem_store::filter::{FilterCtx, FilterOp, ResolvedFilter};
use crate::mem_store::numeric_store::{NumericResult, NumericStore};
use crate::mem_store::strings::StrId;

/// Immutable container of one batch of ingested rows: an int store, a str
/// store, the ts range, and the set of string ids occurring anywhere in the
/// block. Rows are ordered by non-decreasing ts, which block queries exploit
/// to narrow the candidate range by binary search before any filter runs.
pub struct Block {
    min_ts: i64,
    max_ts: i64,
    row_count: usize,
    int_store: NumericStore<i64>,
    str_store: NumericStore<StrId>,
    str_id_set: FnvHashSet<StrId>,
}

/// A fully resolved filter set for one query, shared across all blocks.
pub(crate) struct BlockFilter {
    pub min_ts: i64,
    pub max_ts: i64,
    pub int_filters: Vec<ResolvedFilter<i64>>,
    pub str_filters: Vec<ResolvedFilter<StrId>>,
}

pub(crate) struct BlockQuery {
    pub filter: BlockFilter,
    pub int_columns: Vec<ColumnInfo>,
    pub str_columns: Vec<ColumnInfo>,
}

/// Per-block query output. `count` rows survived filtering; the matrices are
/// indexed by requested column, then by surviving row in ts order.
pub(crate) struct BlockQueryResult {
    pub count: usize,
    pub int: NumericResult<i64>,
    pub str: NumericResult<StrId>,
    pub str_ids_seen: FnvHashSet<StrId>,
}

impl Block {
    pub(crate) fn new(
        min_ts: i64,
        max_ts: i64,
        row_count: usize,
        int_columns: PartialColumns<i64>,
        str_columns: PartialColumns<StrId>,
        str_id_set: FnvHashSet<StrId>,
    ) -> Result<Block, StoreError> {
        if row_count == 0 {
            return Err(StoreError::EmptyBlock);
        }
        if min_ts > max_ts {
            return Err(StoreError::InvariantViolated(format!(
                "block ts range inverted: {} > {}",
                min_ts, max_ts
            )));
        }

        let int_store = NumericStore::from_partial_columns(int_columns, row_count)?;
        let str_store = NumericStore::from_partial_columns(str_columns, row_count)?;

        // Every row carries ts, so the int store must cover all rows.
        if int_store.col_count() == 0 || int_store.row_count() != row_count {
            return Err(StoreError::InvariantViolated(
                "int store does not cover every row; some rows are missing ts".to_string(),
            ));
        }

        let block = Block {
            min_ts,
            max_ts,
            row_count,
            int_store,
            str_store,
            str_id_set,
        };
        debug_assert!(block.int_store.debug_invariant_check().is_ok());
        debug_assert!(block.str_store.debug_invariant_check().is_ok());
        debug_assert!((0..row_count - 1).all(|r| block.ts_at(r) <= block.ts_at(r + 1)));
        Ok(block)
    }

    pub fn min_ts(&self) -> i64 {
        self.min_ts
    }

    pub fn max_ts(&self) -> i64 {
        self.max_ts
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    fn ts_at(&self, row: usize) -> i64 {
        // ts is always local column 0 of the int store
        self.int_store.value_at(0, row)
    }

    /// The inclusive row range with `query_min <= ts <= query_max`, or
    /// `None` when the block and the query range are disjoint.
    fn ts_bounds(&self, query_min: i64, query_max: i64) -> Option<(usize, usize)> {
        if self.max_ts < query_min || self.min_ts > query_max {
            return None;
        }

        // first row with ts >= query_min
        let mut lo = 0;
        let mut hi = self.row_count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.ts_at(mid) < query_min {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let start = lo;

        // first row with ts > query_max
        let mut lo = start;
        let mut hi = self.row_count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.ts_at(mid) <= query_max {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let end = lo;

        if start >= end {
            return None;
        }
        Some((start, end - 1))
    }

    /// Filters then projects. `None` when the ts ranges are disjoint or the
    /// bitmap empties at any stage.
    pub(crate) fn query(&self, query: &BlockQuery) -> Option<BlockQueryResult> {
        let (start, end) = self.ts_bounds(query.filter.min_ts, query.filter.max_ts)?;
        let bitmap = match RowBitmap::with_ones_range(self.row_count, start, end) {
            Some(bitmap) => bitmap,
            None => {
                error!(
                    "unable to create bitmap of {} rows for range [{}, {}]",
                    self.row_count, start, end
                );
                return None;
            }
        };
        let mut ctx = FilterCtx { bitmap, start, end };

        self.apply_int_filters(&mut ctx, &query.filter.int_filters);
        self.apply_str_filters(&mut ctx, &query.filter.str_filters);
        if !ctx.bitmap.any() {
            debug!("block [{}, {}] filtered to no rows", self.min_ts, self.max_ts);
            return None;
        }

        let count = ctx.bitmap.count_ones();
        let (int, _) = self.int_store.get(&ctx.bitmap, &query.int_columns, false);
        let (str_result, str_ids_seen) = self.str_store.get(&ctx.bitmap, &query.str_columns, true);

        Some(BlockQueryResult {
            count,
            int,
            str: str_result,
            str_ids_seen,
        })
    }

    fn apply_int_filters(&self, ctx: &mut FilterCtx, filters: &[ResolvedFilter<i64>]) {
        for filter in filters {
            if !self.int_store.apply_filter(ctx, filter) {
                return;
            }
        }
    }

    /// String filters consult the block's string-id set before comparing:
    /// an EQ against ids the block never saw can clear the bitmap outright,
    /// and an NE against such an id passes every row.
    fn apply_str_filters(&self, ctx: &mut FilterCtx, filters: &[ResolvedFilter<StrId>]) {
        for filter in filters {
            match filter.op {
                FilterOp::Eq => {
                    let present: Vec<StrId> = filter
                        .values
                        .iter()
                        .copied()
                        .filter(|id| self.str_id_set.contains(id))
                        .collect();
                    if present.is_empty() {
                        ctx.bitmap.clear_all();
                        return;
                    }
                    let narrowed = ResolvedFilter {
                        col: filter.col.clone(),
                        op: filter.op,
                        values: present,
                    };
                    if !self.str_store.apply_filter(ctx, &narrowed) {
                        return;
                    }
                }
                FilterOp::Ne => {
                    // any absent target makes the disjunction true for every row
                    if filter.values.iter().any(|id| !self.str_id_set.contains(id)) {
                        continue;
                    }
                    if !self.str_store.apply_filter(ctx, filter) {
                        return;
                    }
                }
                _ => {
                    if !self.str_store.apply_filter(ctx, filter) {
                        return;
                    }
                }
            }
        }
    }
}
