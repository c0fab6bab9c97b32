use std::fmt;
use std::hash::Hash;

use fnv::{FnvHashMap, FnvHashSet};
use log::error;

use crate::bitvec::RowBitmap;
use crate::errors::StoreError;
use crate::ingest::ingester::PartialColumns;
use crate::mem_store::columns::{ColumnId, ColumnInfo, TS_COLUMN_ID};
use crate::mem_store::filter::{predicate_for, FilterCtx, FilterOp, ResolvedFilter};

/// Index of a row's value inside a column's value list. Index 0 is reserved
/// for null; `values[col][0]` is a zero-initialized placeholder.
pub type ValueIndex = u16;

pub const NULL_VALUE_INDEX: ValueIndex = 0;

/// Scalar types a block can store: `i64` for int columns, `u32` string ids
/// for string columns.
pub trait StoreValue:
    Copy + Eq + Hash + Ord + Default + fmt::Debug + Send + Sync + 'static
{
}

impl StoreValue for i64 {}
impl StoreValue for u32 {}

/// Dictionary-encoded column-major storage for one scalar type within a
/// block. Three parallel structures over `col_count` x `row_count`:
///
/// - `matrix[local_col][row]` is the value index of the row in that column,
///   `NULL_VALUE_INDEX` meaning the row has no value there.
/// - `values[local_col]` lists the distinct values of the column; index 0 is
///   the null placeholder, indexes 1.. are real values.
/// - `column_ids` maps table-level column ids to local column indexes. A
///   column is absent iff no row in the block had a value for it.
///
/// Invariants of an initialized store:
/// 1. every local column has at least one non-null row
/// 2. every value in `values[c][1..]` is referenced by at least one row
/// 3. `matrix[c][r] < values[c].len()` for all `(c, r)`
/// 4. all `matrix[c]` have the same length, the block's row count
pub struct NumericStore<T> {
    matrix: Vec<Vec<ValueIndex>>,
    values: Vec<Vec<T>>,
    column_ids: FnvHashMap<ColumnId, u16>,
}

impl<T: StoreValue> NumericStore<T> {
    /// Builds the dictionary-encoded form from the ingester's inverted
    /// `column -> value -> rows` structure. Rows unreferenced by a column
    /// stay at the null index. The ts column, when present, always becomes
    /// local column 0.
    pub(crate) fn from_partial_columns(
        partial: PartialColumns<T>,
        row_count: usize,
    ) -> Result<NumericStore<T>, StoreError> {
        if row_count == 0 {
            return Err(StoreError::EmptyBlock);
        }

        let mut partial = partial.into_inner();
        let col_count = partial.len();
        let mut store = NumericStore {
            matrix: vec![vec![NULL_VALUE_INDEX; row_count]; col_count],
            values: Vec::with_capacity(col_count),
            column_ids: FnvHashMap::default(),
        };

        let mut col_ids: Vec<ColumnId> = partial.keys().copied().collect();
        col_ids.sort_unstable();
        // ts first; the sort above already guarantees it since TS_COLUMN_ID
        // is the smallest id, but the block layer depends on it.
        debug_assert!(col_ids.is_empty() || !partial.contains_key(&TS_COLUMN_ID) || col_ids[0] == TS_COLUMN_ID);

        for (local_col, col_id) in col_ids.into_iter().enumerate() {
            let column_data = partial.remove(&col_id).unwrap();
            if column_data.len() + 1 > usize::from(ValueIndex::MAX) {
                return Err(StoreError::InvariantViolated(format!(
                    "column {} has {} distinct values, too many for a block",
                    col_id,
                    column_data.len()
                )));
            }

            let mut values = Vec::with_capacity(column_data.len() + 1);
            values.push(T::default());
            for (value, rows) in column_data {
                values.push(value);
                let value_idx = (values.len() - 1) as ValueIndex;
                for row in rows {
                    let row = row as usize;
                    if row >= row_count {
                        return Err(StoreError::InvariantViolated(format!(
                            "row index {} out of bounds for block of {} rows",
                            row, row_count
                        )));
                    }
                    store.matrix[local_col][row] = value_idx;
                }
            }
            store.values.push(values);
            store.column_ids.insert(col_id, local_col as u16);
        }

        Ok(store)
    }

    pub fn col_count(&self) -> usize {
        self.matrix.len()
    }

    pub fn row_count(&self) -> usize {
        self.matrix.first().map(|col| col.len()).unwrap_or(0)
    }

    fn local_column_id(&self, col: &ColumnInfo) -> Option<u16> {
        self.column_ids.get(&col.id).copied()
    }

    /// The value of `row` in local column `local_col`; null rows yield the
    /// zero placeholder.
    pub(crate) fn value_at(&self, local_col: usize, row: usize) -> T {
        let value_idx = self.matrix[local_col][row];
        self.values[local_col][value_idx as usize]
    }

    /// Applies one filter, clearing bits for rows that fail it. Returns
    /// false when the whole bitmap was cleared and remaining filters can be
    /// skipped.
    pub(crate) fn apply_filter(&self, ctx: &mut FilterCtx, filter: &ResolvedFilter<T>) -> bool {
        let local_col = match self.local_column_id(&filter.col) {
            Some(local_col) => local_col as usize,
            // Column absent from this block: every row is null here, so a
            // null or not-equal check passes all rows; anything else can
            // match nothing.
            None => match filter.op {
                FilterOp::Null | FilterOp::Ne => return true,
                _ => {
                    ctx.bitmap.clear_all();
                    return false;
                }
            },
        };

        let rows = &self.matrix[local_col];
        if let FilterOp::Null | FilterOp::Nonnull = filter.op {
            let want_null = filter.op == FilterOp::Null;
            for idx in ctx.start..=ctx.end {
                if ctx.bitmap.is_set(idx) && (rows[idx] == NULL_VALUE_INDEX) != want_null {
                    ctx.bitmap.clear(idx);
                }
            }
            return true;
        }

        let predicate = match predicate_for::<T>(filter.op) {
            Some(predicate) => predicate,
            None => {
                error!("unexpected filter op: {:?}", filter.op);
                return true;
            }
        };

        let values = &self.values[local_col];
        for idx in ctx.start..=ctx.end {
            if !ctx.bitmap.is_set(idx) {
                continue;
            }
            let value_idx = rows[idx];
            if value_idx == NULL_VALUE_INDEX {
                // A null row fails every comparison except not-equal.
                if filter.op != FilterOp::Ne {
                    ctx.bitmap.clear(idx);
                }
                continue;
            }
            let value = values[value_idx as usize];
            let keep = filter.values.iter().any(|&target| predicate(value, target));
            if !keep {
                ctx.bitmap.clear(idx);
            }
        }
        true
    }

    /// Materializes `columns` for the set rows of `bitmap`, compacting row
    /// indexes to the bitmap's set-bit positions in order. Columns absent
    /// from the block keep their output slot with no values. When
    /// `record_values` is set, also returns the set of values observed
    /// (used to build the reply's string id map).
    pub(crate) fn get(
        &self,
        bitmap: &RowBitmap,
        columns: &[ColumnInfo],
        record_values: bool,
    ) -> (NumericResult<T>, FnvHashSet<T>) {
        let row_count = bitmap.count_ones();
        let mut result = NumericResult::new(columns.len(), row_count);
        let mut seen = FnvHashSet::default();

        for (col_idx, col) in columns.iter().enumerate() {
            let local_col = match self.local_column_id(col) {
                Some(local_col) => local_col as usize,
                None => continue,
            };
            let rows = &self.matrix[local_col];
            let values = &self.values[local_col];
            let out_matrix = &mut result.matrix[col_idx];
            let out_has_value = &mut result.has_value[col_idx];

            for (out_idx, row) in bitmap.iter_ones().enumerate() {
                let value_idx = rows[row];
                if value_idx != NULL_VALUE_INDEX {
                    let value = values[value_idx as usize];
                    out_matrix[out_idx] = value;
                    out_has_value[out_idx] = true;
                    if record_values {
                        seen.insert(value);
                    }
                }
            }
        }

        (result, seen)
    }

    /// Validates the store invariants; see the struct comment.
    pub fn debug_invariant_check(&self) -> Result<(), StoreError> {
        if self.matrix.len() != self.values.len() || self.matrix.len() != self.column_ids.len() {
            return Err(StoreError::InvariantViolated(
                "matrix, values, and column_ids have different lengths".to_string(),
            ));
        }

        let row_count = self.row_count();
        if self.col_count() > 0 && row_count == 0 {
            return Err(StoreError::InvariantViolated("store has no rows".to_string()));
        }
        if self.matrix.iter().any(|col| col.len() != row_count) {
            return Err(StoreError::InvariantViolated(
                "matrix columns have different lengths".to_string(),
            ));
        }

        for (&col_id, &local_col) in &self.column_ids {
            let local_col = local_col as usize;
            if local_col >= self.matrix.len() {
                return Err(StoreError::InvariantViolated(format!(
                    "invalid local column id for column {}",
                    col_id
                )));
            }
            let values = &self.values[local_col];
            if values.is_empty() {
                return Err(StoreError::InvariantViolated(format!(
                    "column {} has no null placeholder",
                    col_id
                )));
            }
            if values[0] != T::default() {
                return Err(StoreError::InvariantViolated(format!(
                    "column {} null placeholder is not zero",
                    col_id
                )));
            }
            if self.matrix[local_col].iter().all(|&idx| idx == NULL_VALUE_INDEX) {
                return Err(StoreError::InvariantViolated(format!(
                    "column {} has no non-null row",
                    col_id
                )));
            }

            let mut referenced = vec![false; values.len()];
            referenced[NULL_VALUE_INDEX as usize] = true;
            for &value_idx in &self.matrix[local_col] {
                match referenced.get_mut(value_idx as usize) {
                    Some(slot) => *slot = true,
                    None => {
                        return Err(StoreError::InvariantViolated(format!(
                            "column {} references value index {} past {} values",
                            col_id,
                            value_idx,
                            values.len()
                        )))
                    }
                }
            }
            if referenced.iter().any(|&r| !r) {
                return Err(StoreError::InvariantViolated(format!(
                    "column {} stores a value no row references",
                    col_id
                )));
            }
        }

        Ok(())
    }
}

/// Result of a projection: `matrix[col_idx][row_idx]` and a parallel
/// has-value matrix, where `col_idx` indexes the requested columns and
/// `row_idx` the set bits of the filter bitmap, in order.
pub struct NumericResult<T> {
    pub matrix: Vec<Vec<T>>,
    pub has_value: Vec<Vec<bool>>,
}

impl<T: StoreValue> NumericResult<T> {
    fn new(col_count: usize, row_count: usize) -> NumericResult<T> {
        NumericResult {
            matrix: vec![vec![T::default(); row_count]; col_count],
            has_value: vec![vec![false; row_count]; col_count],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::columns::ColumnType;

    fn col(id: ColumnId) -> ColumnInfo {
        ColumnInfo {
            id,
            name: format!("col_{}", id),
            col_type: ColumnType::Int,
        }
    }

    fn filter(id: ColumnId, op: FilterOp, values: Vec<i64>) -> ResolvedFilter<i64> {
        ResolvedFilter {
            col: col(id),
            op,
            values,
        }
    }

    /// rows: (row 0) ts=1 a=10 -- (row 1) ts=2 a=20 -- (row 2) ts=3 a=null
    fn sample_store() -> NumericStore<i64> {
        let mut partial = PartialColumns::new();
        partial.insert_value(TS_COLUMN_ID, 0, 1);
        partial.insert_value(TS_COLUMN_ID, 1, 2);
        partial.insert_value(TS_COLUMN_ID, 2, 3);
        partial.insert_value(5, 0, 10);
        partial.insert_value(5, 1, 20);
        NumericStore::from_partial_columns(partial, 3).unwrap()
    }

    fn full_ctx(rows: usize) -> FilterCtx {
        FilterCtx {
            bitmap: RowBitmap::with_ones_range(rows, 0, rows - 1).unwrap(),
            start: 0,
            end: rows - 1,
        }
    }

    #[test]
    fn construction_and_invariants() {
        let store = sample_store();
        assert_eq!(store.col_count(), 2);
        assert_eq!(store.row_count(), 3);
        store.debug_invariant_check().unwrap();
        // ts is local column 0
        assert_eq!(store.value_at(0, 0), 1);
        assert_eq!(store.value_at(0, 2), 3);
    }

    #[test]
    fn empty_partial_columns_need_rows() {
        let partial: PartialColumns<i64> = PartialColumns::new();
        assert!(matches!(
            NumericStore::from_partial_columns(partial, 0),
            Err(StoreError::EmptyBlock)
        ));
        let store = NumericStore::<i64>::from_partial_columns(PartialColumns::new(), 3).unwrap();
        assert_eq!(store.col_count(), 0);
        store.debug_invariant_check().unwrap();
    }

    #[test]
    fn filter_comparisons() {
        let store = sample_store();
        let cases: Vec<(FilterOp, i64, Vec<usize>)> = vec![
            (FilterOp::Eq, 20, vec![1]),
            (FilterOp::Ne, 20, vec![0, 2]), // null row passes NE
            (FilterOp::Lt, 20, vec![0]),
            (FilterOp::Le, 20, vec![0, 1]),
            (FilterOp::Gt, 10, vec![1]),
            (FilterOp::Ge, 10, vec![0, 1]),
        ];
        for (op, value, expected) in cases {
            let mut ctx = full_ctx(3);
            assert!(store.apply_filter(&mut ctx, &filter(5, op, vec![value])));
            assert_eq!(
                ctx.bitmap.iter_ones().collect::<Vec<_>>(),
                expected,
                "op {:?}",
                op
            );
        }
    }

    #[test]
    fn filter_in_semantics() {
        let store = sample_store();
        let mut ctx = full_ctx(3);
        store.apply_filter(&mut ctx, &filter(5, FilterOp::Eq, vec![10, 20]));
        assert_eq!(ctx.bitmap.iter_ones().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn filter_null_semantics() {
        let store = sample_store();
        let mut ctx = full_ctx(3);
        store.apply_filter(&mut ctx, &filter(5, FilterOp::Null, vec![]));
        assert_eq!(ctx.bitmap.iter_ones().collect::<Vec<_>>(), vec![2]);

        let mut ctx = full_ctx(3);
        store.apply_filter(&mut ctx, &filter(5, FilterOp::Nonnull, vec![]));
        assert_eq!(ctx.bitmap.iter_ones().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn filter_absent_column() {
        let store = sample_store();
        // NULL and NE pass every row
        for op in [FilterOp::Null, FilterOp::Ne] {
            let mut ctx = full_ctx(3);
            assert!(store.apply_filter(&mut ctx, &filter(9, op, vec![7])));
            assert_eq!(ctx.bitmap.count_ones(), 3);
        }
        // anything else clears the bitmap and short-circuits
        let mut ctx = full_ctx(3);
        assert!(!store.apply_filter(&mut ctx, &filter(9, FilterOp::Eq, vec![7])));
        assert!(!ctx.bitmap.any());
    }

    #[test]
    fn filter_order_is_irrelevant() {
        let store = sample_store();
        let f1 = filter(5, FilterOp::Gt, vec![5]);
        let f2 = filter(TS_COLUMN_ID, FilterOp::Le, vec![2]);

        let mut forward = full_ctx(3);
        store.apply_filter(&mut forward, &f1);
        store.apply_filter(&mut forward, &f2);
        let mut backward = full_ctx(3);
        store.apply_filter(&mut backward, &f2);
        store.apply_filter(&mut backward, &f1);
        assert_eq!(
            forward.bitmap.iter_ones().collect::<Vec<_>>(),
            backward.bitmap.iter_ones().collect::<Vec<_>>()
        );
    }

    #[test]
    fn get_projects_and_compacts() {
        let store = sample_store();
        let mut bitmap = RowBitmap::with_ones_range(3, 0, 2).unwrap();
        bitmap.clear(1);

        let (result, seen) = store.get(&bitmap, &[col(5), col(TS_COLUMN_ID)], true);
        assert_eq!(result.matrix[0], vec![10, 0]);
        assert_eq!(result.has_value[0], vec![true, false]);
        assert_eq!(result.matrix[1], vec![1, 3]);
        assert_eq!(result.has_value[1], vec![true, true]);
        let mut seen: Vec<i64> = seen.into_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 3, 10]);
    }

    #[test]
    fn get_keeps_slots_of_absent_columns() {
        let store = sample_store();
        let bitmap = RowBitmap::with_ones_range(3, 0, 2).unwrap();
        let (result, _) = store.get(&bitmap, &[col(9), col(5)], false);
        assert_eq!(result.has_value[0], vec![false, false, false]);
        assert_eq!(result.matrix[1], vec![10, 20, 0]);
        assert_eq!(result.has_value[1], vec![true, true, false]);
    }

    #[test]
    fn too_many_distinct_values() {
        let mut partial = PartialColumns::new();
        for i in 0..u32::from(ValueIndex::MAX) {
            partial.insert_value(TS_COLUMN_ID, i, i as i64 + 1);
        }
        let result = NumericStore::from_partial_columns(partial, u32::from(ValueIndex::MAX) as usize);
        assert!(matches!(result, Err(StoreError::InvariantViolated(_))));
    }
}
