use fnv::{FnvHashMap, FnvHashSet};

use crate::errors::{IngestError, StoreError};
use crate::ingest::raw_row::RawRow;
use crate::mem_store::block::Block;
use crate::mem_store::columns::{ColumnId, ColumnRegistry, ColumnType, TS_COLUMN_ID, TS_COLUMN_NAME};
use crate::mem_store::numeric_store::StoreValue;
use crate::mem_store::strings::{StrId, StringDict};

/// One validated row on its way into a block. The first int entry is always
/// `(TS_COLUMN_ID, ts)`.
#[derive(Debug, Default)]
pub(crate) struct Row {
    int_cols: Vec<(ColumnId, i64)>,
    str_cols: Vec<(ColumnId, StrId)>,
}

impl Row {
    fn ts(&self) -> i64 {
        self.int_cols[0].1
    }
}

/// The ingester's inversion of row-wise storage: `column -> value -> rows
/// that carry the value`. Built during `freeze` and consumed by block
/// construction, which turns it into the dictionary-encoded form directly.
#[derive(Debug)]
pub(crate) struct PartialColumns<T>(FnvHashMap<ColumnId, FnvHashMap<T, Vec<u32>>>);

impl<T: StoreValue> PartialColumns<T> {
    pub fn new() -> PartialColumns<T> {
        PartialColumns(FnvHashMap::default())
    }

    pub fn insert_value(&mut self, col: ColumnId, row: u32, value: T) {
        self.0
            .entry(col)
            .or_default()
            .entry(value)
            .or_default()
            .push(row);
    }

    pub fn into_inner(self) -> FnvHashMap<ColumnId, FnvHashMap<T, Vec<u32>>> {
        self.0
    }
}

/// Everything needed to build one immutable block, produced by freezing an
/// ingester and handed to the background writer through the partial-block
/// channel.
#[derive(Debug)]
pub(crate) struct PartialBlock {
    pub int_columns: PartialColumns<i64>,
    pub str_columns: PartialColumns<StrId>,
    pub str_id_set: FnvHashSet<StrId>,
    pub min_ts: i64,
    pub max_ts: i64,
    pub row_count: usize,
}

impl PartialBlock {
    pub fn build_block(self) -> Result<Block, StoreError> {
        Block::new(
            self.min_ts,
            self.max_ts,
            self.row_count,
            self.int_columns,
            self.str_columns,
            self.str_id_set,
        )
    }
}

/// Accumulates raw rows until they are frozen into a `PartialBlock`.
/// Ingesters are pooled and reused; they are not thread-safe and must be
/// reset before each use (the pool does this on borrow).
#[derive(Default)]
pub(crate) struct Ingester {
    rows: Vec<Row>,
    str_ids_seen: FnvHashSet<StrId>,
}

impl Ingester {
    pub fn reset(&mut self) {
        self.rows.clear();
        self.str_ids_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validates one raw row and stages it for the next freeze. Column
    /// registration and string interning go through the shared table state;
    /// any failure drops the row without touching the staged ones.
    pub fn ingest_raw_row(
        &mut self,
        columns: &ColumnRegistry,
        strings: &StringDict,
        raw: &RawRow,
    ) -> Result<(), IngestError> {
        let ts = raw.int.get(TS_COLUMN_NAME).copied().unwrap_or(0);
        if ts <= 0 {
            return Err(IngestError::InvalidTs(ts));
        }

        let mut row = Row::default();
        row.int_cols.push((TS_COLUMN_ID, ts));

        for (name, &value) in &raw.int {
            if name == TS_COLUMN_NAME {
                continue; // already staged as the first entry
            }
            let col_id = columns.get_or_register(name, ColumnType::Int)?;
            row.int_cols.push((col_id, value));
        }

        for (name, value) in &raw.str {
            let col_id = columns.get_or_register(name, ColumnType::Str)?;
            let (str_id, _) = strings
                .get_or_insert(value.trim())
                .ok_or(IngestError::DictionaryFull(strings.max_str_count()))?;
            strings.record_column(col_id, str_id);
            self.str_ids_seen.insert(str_id);
            row.str_cols.push((col_id, str_id));
        }

        self.rows.push(row);
        Ok(())
    }

    /// Freezes the staged rows into a `PartialBlock`, draining the ingester.
    /// Rows are sorted by ts so the block satisfies its ordering invariant.
    pub fn freeze(&mut self) -> Result<PartialBlock, StoreError> {
        if self.rows.is_empty() {
            return Err(StoreError::EmptyBlock);
        }

        let mut rows = std::mem::take(&mut self.rows);
        rows.sort_by_key(Row::ts);
        let min_ts = rows[0].ts();
        let max_ts = rows[rows.len() - 1].ts();

        let mut int_columns = PartialColumns::new();
        let mut str_columns = PartialColumns::new();
        for (row_idx, row) in rows.iter().enumerate() {
            let row_idx = row_idx as u32;
            for &(col_id, value) in &row.int_cols {
                int_columns.insert_value(col_id, row_idx, value);
            }
            for &(col_id, str_id) in &row.str_cols {
                str_columns.insert_value(col_id, row_idx, str_id);
            }
        }

        Ok(PartialBlock {
            int_columns,
            str_columns,
            str_id_set: std::mem::take(&mut self.str_ids_seen),
            min_ts,
            max_ts,
            row_count: rows.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_state() -> (ColumnRegistry, StringDict) {
        let columns = ColumnRegistry::new(64);
        columns
            .get_or_register(TS_COLUMN_NAME, ColumnType::Int)
            .unwrap();
        (columns, StringDict::new(1024))
    }

    #[test]
    fn rejects_missing_or_invalid_ts() {
        let (columns, strings) = table_state();
        let mut ingester = Ingester::default();
        let row = RawRow::new().with_int("count", 1);
        assert_eq!(
            ingester.ingest_raw_row(&columns, &strings, &row),
            Err(IngestError::InvalidTs(0))
        );
        let row = RawRow::new().with_int("ts", -5);
        assert_eq!(
            ingester.ingest_raw_row(&columns, &strings, &row),
            Err(IngestError::InvalidTs(-5))
        );
        assert!(ingester.is_empty());
    }

    #[test]
    fn rejects_row_when_dictionary_full() {
        let columns = ColumnRegistry::new(64);
        columns
            .get_or_register(TS_COLUMN_NAME, ColumnType::Int)
            .unwrap();
        let strings = StringDict::new(1);
        let mut ingester = Ingester::default();
        let ok = RawRow::new().with_int("ts", 1).with_str("event", "init");
        ingester.ingest_raw_row(&columns, &strings, &ok).unwrap();
        let full = RawRow::new().with_int("ts", 2).with_str("event", "publish");
        assert_eq!(
            ingester.ingest_raw_row(&columns, &strings, &full),
            Err(IngestError::DictionaryFull(1))
        );
        assert_eq!(ingester.len(), 1);
    }

    #[test]
    fn trims_string_values() {
        let (columns, strings) = table_state();
        let mut ingester = Ingester::default();
        let row = RawRow::new().with_int("ts", 1).with_str("event", "  init  ");
        ingester.ingest_raw_row(&columns, &strings, &row).unwrap();
        assert!(strings.lookup_id("init").is_some());
        assert!(strings.lookup_id("  init  ").is_none());
    }

    #[test]
    fn freeze_sorts_rows_by_ts() {
        let (columns, strings) = table_state();
        let mut ingester = Ingester::default();
        for ts in [30, 10, 20] {
            let row = RawRow::new().with_int("ts", ts).with_int("count", ts * 2);
            ingester.ingest_raw_row(&columns, &strings, &row).unwrap();
        }
        let partial = ingester.freeze().unwrap();
        assert_eq!(partial.min_ts, 10);
        assert_eq!(partial.max_ts, 30);
        assert_eq!(partial.row_count, 3);
        assert!(ingester.is_empty());

        let block = partial.build_block().unwrap();
        assert_eq!(block.min_ts(), 10);
        assert_eq!(block.max_ts(), 30);
        assert_eq!(block.row_count(), 3);
    }

    #[test]
    fn freeze_empty_fails() {
        let mut ingester = Ingester::default();
        assert!(matches!(ingester.freeze(), Err(StoreError::EmptyBlock)));
    }

    #[test]
    fn freeze_collects_block_local_str_ids() {
        let (columns, strings) = table_state();
        let mut ingester = Ingester::default();
        let row = RawRow::new()
            .with_int("ts", 1)
            .with_str("event", "init")
            .with_str("source", "toolbar");
        ingester.ingest_raw_row(&columns, &strings, &row).unwrap();
        let partial = ingester.freeze().unwrap();
        assert_eq!(partial.str_id_set.len(), 2);
        assert!(partial
            .str_id_set
            .contains(&strings.lookup_id("init").unwrap()));
    }
}
