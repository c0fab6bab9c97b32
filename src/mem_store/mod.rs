pub mod block;
pub mod columns;
pub mod filter;
pub mod numeric_store;
pub mod strings;
pub mod table;

pub use self::columns::{ColumnType, TS_COLUMN_NAME};
pub use self::strings::StrId;
pub use self::table::Table;
