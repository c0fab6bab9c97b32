use std::sync::Mutex;

use crate::ingest::ingester::Ingester;

/// Free-list of ingesters. They carry large backing vectors, so they are
/// reused across ingest calls instead of allocated per call. Reset happens
/// on borrow, not on return: a caller that bails out half-way must not be
/// able to leak staged rows into the next borrower.
#[derive(Default)]
pub(crate) struct IngesterPool {
    free: Mutex<Vec<Ingester>>,
}

impl IngesterPool {
    pub fn take(&self) -> Ingester {
        let mut ingester = self.free.lock().unwrap().pop().unwrap_or_default();
        ingester.reset();
        ingester
    }

    pub fn put(&self, ingester: Ingester) {
        self.free.lock().unwrap().push(ingester);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::raw_row::RawRow;
    use crate::mem_store::columns::{ColumnRegistry, ColumnType, TS_COLUMN_NAME};
    use crate::mem_store::strings::StringDict;

    #[test]
    fn reuse_resets_state() {
        let columns = ColumnRegistry::new(8);
        columns
            .get_or_register(TS_COLUMN_NAME, ColumnType::Int)
            .unwrap();
        let strings = StringDict::new(8);

        let pool = IngesterPool::default();
        let mut ingester = pool.take();
        let row = RawRow::new().with_int("ts", 1).with_str("event", "init");
        ingester.ingest_raw_row(&columns, &strings, &row).unwrap();
        // returned dirty, e.g. because the caller hit an error path
        pool.put(ingester);

        let ingester = pool.take();
        assert!(ingester.is_empty());
    }
}
