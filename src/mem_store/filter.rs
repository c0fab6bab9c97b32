use serde::{Deserialize, Serialize};

use crate::bitvec::RowBitmap;
use crate::mem_store::columns::ColumnInfo;
use crate::mem_store::numeric_store::StoreValue;

/// Filter comparison operators. `Null`/`Nonnull` test presence; the rest
/// compare against the filter value(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Null,
    Nonnull,
}

/// A wire filter resolved against the column registry: the column metadata
/// plus the target value(s) in storage representation (string filters carry
/// string ids). Multiple values have IN-semantics: a row passes if the
/// predicate holds for any of them.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedFilter<T> {
    pub col: ColumnInfo,
    pub op: FilterOp,
    pub values: Vec<T>,
}

/// State threaded through the filters of one block query: the row bitmap
/// plus the contiguous candidate range `[start, end]` selected by the
/// ts-range narrowing. Filters never set bits outside that range.
pub(crate) struct FilterCtx {
    pub bitmap: RowBitmap,
    pub start: usize,
    pub end: usize,
}

pub(crate) fn predicate_for<T: StoreValue>(op: FilterOp) -> Option<fn(T, T) -> bool> {
    match op {
        FilterOp::Eq => Some(|left, right| left == right),
        FilterOp::Ne => Some(|left, right| left != right),
        FilterOp::Lt => Some(|left, right| left < right),
        FilterOp::Gt => Some(|left, right| left > right),
        FilterOp::Le => Some(|left, right| left <= right),
        FilterOp::Ge => Some(|left, right| left >= right),
        FilterOp::Null | FilterOp::Nonnull => None,
    }
}
