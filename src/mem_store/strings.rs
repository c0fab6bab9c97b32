use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fnv::FnvHashSet;

use crate::mem_store::columns::ColumnId;

pub type StrId = u32;

/// Sentinel id for strings that were never interned. Filters translated from
/// wire values use it so that block-level filtering can treat the string as
/// absent from every block.
pub const NONEXISTENT_STR_ID: StrId = u32::MAX;

/// Intern table mapping strings to stable `u32` ids for the lifetime of the
/// engine. A string maps to exactly one id; ids are monotone but may have
/// gaps (a reserved id that loses an insert race is never reused).
///
/// Also records which columns each string occurred in, which makes substring
/// search over a column an O(strings-for-column) scan instead of a scan over
/// the whole dictionary.
pub struct StringDict {
    by_value: DashMap<String, StrId>,
    by_id: DashMap<StrId, String>,
    by_column: DashMap<ColumnId, FnvHashSet<StrId>>,
    next_id: AtomicU32,
    max_str_count: u32,
}

impl StringDict {
    pub fn new(max_str_count: u32) -> StringDict {
        StringDict {
            by_value: DashMap::new(),
            by_id: DashMap::new(),
            by_column: DashMap::new(),
            next_id: AtomicU32::new(0),
            max_str_count,
        }
    }

    /// Returns `(id, already_present)`, or `None` if the dictionary is full.
    /// Callers must treat `None` as a hard ingest failure for the row.
    pub fn get_or_insert(&self, value: &str) -> Option<(StrId, bool)> {
        if let Some(id) = self.by_value.get(value) {
            return Some((*id, true));
        }

        // Reserve the next id before publishing the mapping so the read-mostly
        // fast path above never takes a lock. Losing the entry race below
        // permanently skips the reserved id.
        let id = loop {
            let next = self.next_id.load(Ordering::SeqCst);
            if next >= self.max_str_count {
                return None;
            }
            if self
                .next_id
                .compare_exchange(next, next + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break next;
            }
        };

        match self.by_value.entry(value.to_string()) {
            Entry::Occupied(occupied) => Some((*occupied.get(), true)),
            Entry::Vacant(vacant) => {
                // Publish id -> string first so a reader that observes the
                // value mapping can always resolve the id.
                self.by_id.insert(id, value.to_string());
                vacant.insert(id);
                Some((id, false))
            }
        }
    }

    pub fn lookup_id(&self, value: &str) -> Option<StrId> {
        self.by_value.get(value).map(|id| *id.value())
    }

    pub fn lookup_str(&self, id: StrId) -> Option<String> {
        self.by_id.get(&id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn max_str_count(&self) -> u32 {
        self.max_str_count
    }

    /// Records that `id` occurred in column `column`.
    pub fn record_column(&self, column: ColumnId, id: StrId) {
        self.by_column.entry(column).or_default().insert(id);
    }

    /// All interned strings of `column` containing `substring`.
    pub fn search_values(&self, column: ColumnId, substring: &str) -> Vec<String> {
        match self.by_column.get(&column) {
            None => Vec::new(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.lookup_str(*id))
                .filter(|s| s.contains(substring))
                .collect(),
        }
    }
}
