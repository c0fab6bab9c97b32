use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, RwLock};

use log::{error, info, warn};

use crate::engine::aggregator;
use crate::engine::aggregator::{AggCtx, TimelineSpec};
use crate::engine::api::{
    AggOp, ColumnMeta, RowsQuery, RowsQueryResult, TableInfo, TableQuery, TableQueryResult,
    TimelineQuery, TimelineQueryResult,
};
use crate::engine::planner;
use crate::engine::planner::QuerySpec;
use crate::ingest::ingester::Ingester;
use crate::ingest::pool::IngesterPool;
use crate::ingest::raw_row::RawRow;
use crate::mem_store::block::{Block, BlockQueryResult};
use crate::mem_store::columns::{ColumnRegistry, ColumnType, TS_COLUMN_NAME};
use crate::mem_store::strings::StringDict;
use crate::options::Options;
use crate::scheduler::block_writer;
use crate::scheduler::block_writer::WriterMsg;

/// The facade over one logical table: multi-writer ingest on one side, the
/// three query families on the other. Dropping the table closes the
/// partial-block channel; the background writer drains what is queued and
/// exits.
pub struct Table {
    inner: Arc<InnerTable>,
    sender: SyncSender<WriterMsg>,
}

/// State shared between the table handle and the background writer.
pub(crate) struct InnerTable {
    name: String,
    opts: Options,
    columns: ColumnRegistry,
    strings: StringDict,
    /// Sorted by `(min_ts, max_ts)` ascending at all times.
    blocks: RwLock<Vec<Arc<Block>>>,
    row_count: AtomicU64,
    min_ts: AtomicI64,
    max_ts: AtomicI64,
    pool: IngesterPool,
}

impl Table {
    pub fn new(name: &str) -> Table {
        Table::with_options(name, &Options::default())
    }

    pub fn with_options(name: &str, opts: &Options) -> Table {
        let inner = Arc::new(InnerTable::new(name, opts));
        let (sender, receiver) = mpsc::sync_channel(opts.max_partial_blocks);
        block_writer::spawn(inner.clone(), receiver, opts);
        Table { inner, sender }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Ingests a batch of raw rows, splitting it into blocks of at most
    /// `max_rows_per_block` rows and enqueueing them for the background
    /// writer. Returns the number of rows that passed row-level validation;
    /// invalid rows are logged and dropped. With `use_server_ts`, every
    /// row's ts is overwritten with the current wall-clock unix seconds.
    pub fn ingest_raw_rows(&self, rows: Vec<RawRow>, use_server_ts: bool) -> usize {
        let server_ts = planner::unix_now();
        let mut ingester = self.inner.pool.take();
        let mut accepted = 0;

        for mut row in rows {
            if use_server_ts {
                row.int.insert(TS_COLUMN_NAME.to_string(), server_ts);
            }
            match ingester
                .ingest_raw_row(self.inner.columns(), self.inner.strings(), &row)
            {
                Ok(()) => accepted += 1,
                Err(e) => warn!("dropping row: {}", e),
            }
            if ingester.len() >= self.inner.opts.max_rows_per_block {
                self.enqueue(&mut ingester, None);
            }
        }
        if !ingester.is_empty() {
            self.enqueue(&mut ingester, None);
        }

        self.inner.pool.put(ingester);
        accepted
    }

    /// Ingests newline-delimited raw-row JSON from `reader`, flushing
    /// synchronously after every `max_rows_per_block` lines so the data is
    /// queryable as soon as this returns. Malformed lines are logged and
    /// skipped. Returns the number of rows accepted.
    pub fn ingest_buf<R: BufRead>(&self, reader: R) -> usize {
        let mut ingester = self.inner.pool.take();
        let mut accepted = 0;
        let mut total = 0;

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to read ingest line: {}", e);
                    break;
                }
            };
            total += 1;
            match serde_json::from_str::<RawRow>(&line) {
                Ok(row) => {
                    match ingester
                        .ingest_raw_row(self.inner.columns(), self.inner.strings(), &row)
                    {
                        Ok(()) => accepted += 1,
                        Err(e) => warn!("dropping row: {}", e),
                    }
                }
                Err(e) => error!("failed to parse row json: {}", e),
            }
            if ingester.len() >= self.inner.opts.max_rows_per_block {
                self.flush_block_sync(&mut ingester);
            }
        }
        if !ingester.is_empty() {
            self.flush_block_sync(&mut ingester);
        }

        info!("ingested: {}, total: {}", accepted, total);
        self.inner.pool.put(ingester);
        accepted
    }

    /// Backfills from a newline-delimited raw-row JSON file.
    pub fn ingest_file(&self, path: &Path) -> io::Result<usize> {
        let file = File::open(path)?;
        Ok(self.ingest_buf(BufReader::new(file)))
    }

    /// Blocks until the background writer has drained everything enqueued
    /// before this call. After it returns, previously ingested rows are
    /// visible to queries.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.sender.send(WriterMsg::Flush { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    fn enqueue(&self, ingester: &mut Ingester, done: Option<mpsc::Sender<bool>>) {
        match ingester.freeze() {
            Ok(partial) => {
                if self
                    .sender
                    .send(WriterMsg::Block { partial, done })
                    .is_err()
                {
                    error!("partial-block writer is gone, dropping block");
                }
            }
            Err(e) => error!("failed to freeze partial block: {}", e),
        }
    }

    fn flush_block_sync(&self, ingester: &mut Ingester) {
        let (done_tx, done_rx) = mpsc::channel();
        self.enqueue(ingester, Some(done_tx));
        if done_rx.recv() != Ok(true) {
            warn!("partial failure while flushing ingested blocks");
        }
    }

    /// Row-level projection with filtering. `None` means no content: no
    /// blocks overlap the ts range, a referenced column is unknown or
    /// mismatched, or every row was filtered out.
    pub fn rows_query(&self, query: &RowsQuery) -> Option<RowsQueryResult> {
        if query.int_column_names.is_empty() && query.str_column_names.is_empty() {
            warn!("rows query must project at least one column");
            return None;
        }
        let spec = QuerySpec {
            min_ts: query.min_ts,
            max_ts: query.max_ts,
            int_filters: &query.int_filters,
            str_filters: &query.str_filters,
            int_column_names: query.int_column_names.clone(),
            str_column_names: &query.str_column_names,
        };
        let results = planner::query_blocks(&self.inner, &spec)?;
        Some(self.assemble_rows_result(query, &results))
    }

    /// Groupby aggregation over int columns.
    pub fn table_query(&self, query: &TableQuery) -> Option<TableQueryResult> {
        if query.agg_int_column_names.is_empty() {
            warn!("table query must aggregate at least one column");
            return None;
        }
        if query.agg_op == AggOp::TimelineCount {
            warn!("timeline aggregation requires a timeline query");
            return None;
        }

        let mut int_column_names = query.groupby_int_column_names.clone();
        int_column_names.extend_from_slice(&query.agg_int_column_names);
        let spec = QuerySpec {
            min_ts: query.min_ts,
            max_ts: query.max_ts,
            int_filters: &query.int_filters,
            str_filters: &query.str_filters,
            int_column_names,
            str_column_names: &query.groupby_str_column_names,
        };
        let results = planner::query_blocks(&self.inner, &spec)?;

        let ctx = AggCtx {
            op: query.agg_op,
            groupby_int_cnt: query.groupby_int_column_names.len(),
            groupby_str_cnt: query.groupby_str_column_names.len(),
            agg_col_cnt: query.agg_int_column_names.len(),
            timeline: None,
        };
        let agg = aggregator::aggregate(&ctx, &results)?;
        Some(aggregator::assemble_table_result(
            self.inner.strings(),
            query,
            agg,
        ))
    }

    /// Time-bucketed count per group, bucket width `query.gran`, bucket
    /// origin `query.min_ts`.
    pub fn timeline_query(&self, query: &TimelineQuery) -> Option<TimelineQueryResult> {
        let mut int_column_names = query.groupby_int_column_names.clone();
        int_column_names.push(TS_COLUMN_NAME.to_string());
        let spec = QuerySpec {
            min_ts: query.min_ts,
            max_ts: query.max_ts,
            int_filters: &query.int_filters,
            str_filters: &query.str_filters,
            int_column_names,
            str_column_names: &query.groupby_str_column_names,
        };
        let results = planner::query_blocks(&self.inner, &spec)?;

        let ctx = AggCtx {
            op: AggOp::TimelineCount,
            groupby_int_cnt: query.groupby_int_column_names.len(),
            groupby_str_cnt: query.groupby_str_column_names.len(),
            agg_col_cnt: 1,
            timeline: Some(TimelineSpec {
                start_ts: query.min_ts,
                gran_secs: query.gran.secs(),
            }),
        };
        let agg = aggregator::aggregate(&ctx, &results)?;
        Some(aggregator::assemble_timeline_result(
            self.inner.strings(),
            query,
            agg,
        ))
    }

    pub fn table_info(&self) -> TableInfo {
        let columns = self
            .inner
            .columns()
            .all_columns()
            .into_iter()
            .map(|info| ColumnMeta {
                name: info.name,
                col_type: info.col_type,
            })
            .collect();
        TableInfo {
            name: self.inner.name().to_string(),
            row_count: self.inner.row_count(),
            min_ts: self.inner.min_ts(),
            max_ts: self.inner.max_ts(),
            columns,
        }
    }

    /// All values of a string column containing `substring`, in sorted
    /// order. Scans only the strings recorded for that column.
    pub fn search_str_values(&self, column: &str, substring: &str) -> Vec<String> {
        let info = match self.inner.columns().lookup(column) {
            Some(info) if info.col_type == ColumnType::Str => info,
            Some(_) => {
                warn!("search on non-string column {}", column);
                return Vec::new();
            }
            None => {
                warn!("search on unknown column {}", column);
                return Vec::new();
            }
        };
        let mut values = self.inner.strings().search_values(info.id, substring);
        values.sort();
        values
    }

    /// Concatenates per-block projections into the flat column-major reply.
    fn assemble_rows_result(
        &self,
        query: &RowsQuery,
        results: &[BlockQueryResult],
    ) -> RowsQueryResult {
        let total: usize = results.iter().map(|r| r.count).sum();
        let int_cnt = query.int_column_names.len();
        let str_cnt = query.str_column_names.len();

        let mut reply = RowsQueryResult {
            count: total,
            int_column_names: query.int_column_names.clone(),
            int_result: vec![0; int_cnt * total],
            int_has_value: vec![false; int_cnt * total],
            str_column_names: query.str_column_names.clone(),
            str_id_map: HashMap::new(),
            str_result: vec![0; str_cnt * total],
            str_has_value: vec![false; str_cnt * total],
        };

        for col_idx in 0..int_cnt {
            let mut offset = 0;
            for result in results {
                for row_idx in 0..result.count {
                    let slot = col_idx * total + offset + row_idx;
                    reply.int_result[slot] = result.int.matrix[col_idx][row_idx];
                    reply.int_has_value[slot] = result.int.has_value[col_idx][row_idx];
                }
                offset += result.count;
            }
        }
        for col_idx in 0..str_cnt {
            let mut offset = 0;
            for result in results {
                for row_idx in 0..result.count {
                    let slot = col_idx * total + offset + row_idx;
                    reply.str_result[slot] = result.str.matrix[col_idx][row_idx];
                    reply.str_has_value[slot] = result.str.has_value[col_idx][row_idx];
                }
                offset += result.count;
            }
        }

        // ids are process-global, so the reply map is just the union of the
        // per-block observed sets resolved against the dictionary
        for result in results {
            for &str_id in &result.str_ids_seen {
                if let Some(value) = self.inner.strings().lookup_str(str_id) {
                    reply.str_id_map.insert(str_id, value);
                }
            }
        }

        reply
    }
}

impl InnerTable {
    pub(crate) fn new(name: &str, opts: &Options) -> InnerTable {
        let columns = ColumnRegistry::new(opts.max_columns);
        columns
            .get_or_register(TS_COLUMN_NAME, ColumnType::Int)
            .expect("ts column registration on a fresh registry cannot fail");

        InnerTable {
            name: name.to_string(),
            opts: opts.clone(),
            columns,
            strings: StringDict::new(opts.max_str_count),
            blocks: RwLock::new(Vec::new()),
            row_count: AtomicU64::new(0),
            min_ts: AtomicI64::new(i64::MAX),
            max_ts: AtomicI64::new(i64::MIN),
            pool: IngesterPool::default(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn columns(&self) -> &ColumnRegistry {
        &self.columns
    }

    pub(crate) fn strings(&self) -> &StringDict {
        &self.strings
    }

    pub(crate) fn blocks(&self) -> &RwLock<Vec<Arc<Block>>> {
        &self.blocks
    }

    pub(crate) fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::SeqCst)
    }

    pub(crate) fn min_ts(&self) -> Option<i64> {
        match self.min_ts.load(Ordering::SeqCst) {
            i64::MAX => None,
            min_ts => Some(min_ts),
        }
    }

    pub(crate) fn max_ts(&self) -> Option<i64> {
        match self.max_ts.load(Ordering::SeqCst) {
            i64::MIN => None,
            max_ts => Some(max_ts),
        }
    }

    #[cfg(test)]
    pub(crate) fn block_count(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Appends a finished block, keeping the list sorted by
    /// `(min_ts, max_ts)` and the table meta monotone. Only the background
    /// writer calls this, but the meta updates race with readers, hence the
    /// CAS-retry loops.
    pub(crate) fn add_block(&self, block: Block) {
        loop {
            let old = self.min_ts.load(Ordering::SeqCst);
            let new = old.min(block.min_ts());
            if self
                .min_ts
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        loop {
            let old = self.max_ts.load(Ordering::SeqCst);
            let new = old.max(block.max_ts());
            if self
                .max_ts
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        self.row_count
            .fetch_add(block.row_count() as u64, Ordering::SeqCst);

        let block = Arc::new(block);
        let mut blocks = self.blocks.write().unwrap();
        let position = blocks
            .partition_point(|b| (b.min_ts(), b.max_ts()) <= (block.min_ts(), block.max_ts()));
        blocks.insert(position, block);
    }
}
