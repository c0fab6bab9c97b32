use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::IngestError;

pub type ColumnId = u16;

/// The ts column is created together with the table and is always column 0,
/// both at the table level and inside every block's int store.
pub const TS_COLUMN_ID: ColumnId = 0;
pub const TS_COLUMN_NAME: &str = "ts";

/// Supported column data types. `ts` is stored as an `Int` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub name: String,
    pub col_type: ColumnType,
}

/// Name -> column metadata registry. A column exists iff some ingested row
/// carried a value for it (plus `ts`, registered at table creation).
/// Registration is idempotent on `(name, type)` and first-writer-wins; ids
/// are assigned by CAS-reserving an atomic counter, so a lost race leaves a
/// gap but reads stay lock-free.
pub struct ColumnRegistry {
    by_name: DashMap<String, ColumnInfo>,
    next_id: AtomicU32,
    max_columns: u16,
}

impl ColumnRegistry {
    pub fn new(max_columns: u16) -> ColumnRegistry {
        ColumnRegistry {
            by_name: DashMap::new(),
            next_id: AtomicU32::new(0),
            max_columns,
        }
    }

    pub fn get_or_register(
        &self,
        name: &str,
        col_type: ColumnType,
    ) -> Result<ColumnId, IngestError> {
        if let Some(info) = self.by_name.get(name) {
            return Self::check_type(&info, col_type);
        }

        let id = loop {
            let next = self.next_id.load(Ordering::SeqCst);
            if next >= u32::from(self.max_columns) {
                return Err(IngestError::TooManyColumns(self.max_columns));
            }
            if self
                .next_id
                .compare_exchange(next, next + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break next as ColumnId;
            }
        };

        match self.by_name.entry(name.to_string()) {
            // Another writer registered the name first; the reserved id is
            // permanently skipped.
            Entry::Occupied(occupied) => Self::check_type(occupied.get(), col_type),
            Entry::Vacant(vacant) => {
                vacant.insert(ColumnInfo {
                    id,
                    name: name.to_string(),
                    col_type,
                });
                Ok(id)
            }
        }
    }

    fn check_type(info: &ColumnInfo, expected: ColumnType) -> Result<ColumnId, IngestError> {
        if info.col_type != expected {
            return Err(IngestError::ColumnTypeMismatch {
                name: info.name.clone(),
                expected,
                actual: info.col_type,
            });
        }
        Ok(info.id)
    }

    pub fn lookup(&self, name: &str) -> Option<ColumnInfo> {
        self.by_name.get(name).map(|info| info.value().clone())
    }

    /// Resolves `name` and asserts its type, logging a warning on miss or
    /// mismatch. Query planning aborts on `None`.
    pub fn lookup_assert(&self, name: &str, col_type: ColumnType) -> Option<ColumnInfo> {
        let info = match self.lookup(name) {
            Some(info) => info,
            None => {
                warn!("unknown column: {}", name);
                return None;
            }
        };
        if info.col_type != col_type {
            warn!(
                "unexpected type for column {}: expected {:?}, got {:?}",
                name, col_type, info.col_type
            );
            return None;
        }
        Some(info)
    }

    /// Resolves every name with the expected type, or `None` if any fails.
    pub fn lookup_slice(&self, names: &[String], col_type: ColumnType) -> Option<Vec<ColumnInfo>> {
        names
            .iter()
            .map(|name| self.lookup_assert(name, col_type))
            .collect()
    }

    pub fn column_count(&self) -> usize {
        self.by_name.len()
    }

    /// All registered columns, ordered by id.
    pub fn all_columns(&self) -> Vec<ColumnInfo> {
        let mut columns: Vec<ColumnInfo> =
            self.by_name.iter().map(|entry| entry.value().clone()).collect();
        columns.sort_by_key(|info| info.id);
        columns
    }
}
