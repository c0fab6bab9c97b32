pub mod raw_row;

pub(crate) mod ingester;
pub(crate) mod pool;

pub use self::raw_row::RawRow;
