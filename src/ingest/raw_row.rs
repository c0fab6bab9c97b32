use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The schema of a row received from an external client, and of one line of
/// the newline-delimited backfill format:
///
/// ```json
/// {"int":{"ts":1641742859,"count":906},"str":{"event":"init_app"}}
/// ```
///
/// Rows without a positive `int.ts` are dropped at ingest (unless the caller
/// asked for the server timestamp to be used).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    #[serde(default)]
    pub int: HashMap<String, i64>,
    #[serde(default)]
    pub str: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> RawRow {
        RawRow::default()
    }

    pub fn with_int(mut self, name: &str, value: i64) -> RawRow {
        self.int.insert(name.to_string(), value);
        self
    }

    pub fn with_str(mut self, name: &str, value: &str) -> RawRow {
        self.str.insert(name.to_string(), value.to_string());
        self
    }
}
