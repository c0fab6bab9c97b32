use std::time::Duration;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct Options {
    /// Upper limit for the number of registered columns.
    pub max_columns: u16,
    /// Upper limit for the number of interned strings.
    pub max_str_count: u32,
    /// Rows accumulated before a partial block is frozen.
    pub max_rows_per_block: usize,
    /// Capacity of the partial-block channel. Producers block once the
    /// channel is full, which is the ingest backpressure mechanism.
    pub max_partial_blocks: usize,
    /// How often the background writer drains a nonempty queue on its own.
    pub flush_interval: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            max_columns: 512,
            max_str_count: 0xF_FFFF,
            max_rows_per_block: 4095,
            max_partial_blocks: 15,
            flush_interval: Duration::from_secs(5),
        }
    }
}
