use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::error;

use crate::engine::api::AggOp;

/// Fold state for one (group, aggregated column) pair. One enum instead of
/// boxed trait objects: the variant set is closed and `match` dispatch keeps
/// the per-row `add` path free of virtual calls.
///
/// All variants merge associatively, which is what makes the
/// block-then-table two-phase aggregation correct.
#[derive(Clone, Debug)]
pub(crate) enum Accumulator {
    Count(i64),
    CountDistinct(FnvHashSet<i64>),
    Sum { sum: i64, has_value: bool },
    Avg { sum: i64, count: i64 },
    TimelineCount(FnvHashMap<i64, i64>),
}

/// Finalized accumulator output, tagged by reply shape: `Int` feeds the
/// int-typed agg buffer, `Generic` is widened into it, `Float` feeds the
/// float buffer, and `Timeline` becomes a per-group series.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AccResult {
    Int { value: i64, has_value: bool },
    Float { value: f64, has_value: bool },
    Generic { value: i64, has_value: bool },
    Timeline { buckets: Vec<(i64, i64)> },
}

impl Accumulator {
    pub fn new(op: AggOp) -> Accumulator {
        match op {
            AggOp::Count => Accumulator::Count(0),
            AggOp::CountDistinct => Accumulator::CountDistinct(FnvHashSet::default()),
            AggOp::Sum => Accumulator::Sum {
                sum: 0,
                has_value: false,
            },
            AggOp::Avg => Accumulator::Avg { sum: 0, count: 0 },
            AggOp::TimelineCount => Accumulator::TimelineCount(FnvHashMap::default()),
        }
    }

    /// One accumulator per aggregated column.
    pub fn new_slice(op: AggOp, col_count: usize) -> Vec<Accumulator> {
        (0..col_count).map(|_| Accumulator::new(op)).collect()
    }

    /// Folds one non-null value. For `TimelineCount` the caller passes the
    /// row's ts bucket rather than the raw value.
    pub fn add(&mut self, value: i64) {
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::CountDistinct(seen) => {
                seen.insert(value);
            }
            Accumulator::Sum { sum, has_value } => {
                // overflow wraps, as in the rest of the engine's arithmetic
                *sum = sum.wrapping_add(value);
                *has_value = true;
            }
            Accumulator::Avg { sum, count } => {
                *sum = sum.wrapping_add(value);
                *count += 1;
            }
            Accumulator::TimelineCount(buckets) => {
                *buckets.entry(value).or_insert(0) += 1;
            }
        }
    }

    /// Merges another accumulator of the same variant into this one.
    pub fn merge(&mut self, other: Accumulator) {
        match (self, other) {
            (Accumulator::Count(count), Accumulator::Count(other_count)) => {
                *count += other_count;
            }
            (Accumulator::CountDistinct(seen), Accumulator::CountDistinct(other_seen)) => {
                seen.extend(other_seen);
            }
            (
                Accumulator::Sum { sum, has_value },
                Accumulator::Sum {
                    sum: other_sum,
                    has_value: other_has,
                },
            ) => {
                *sum = sum.wrapping_add(other_sum);
                *has_value = *has_value || other_has;
            }
            (
                Accumulator::Avg { sum, count },
                Accumulator::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum = sum.wrapping_add(other_sum);
                *count += other_count;
            }
            (Accumulator::TimelineCount(buckets), Accumulator::TimelineCount(other_buckets)) => {
                for (bucket, count) in other_buckets {
                    *buckets.entry(bucket).or_insert(0) += count;
                }
            }
            (_, other) => error!("refusing to merge mismatched accumulator: {:?}", other),
        }
    }

    pub fn finalize(self) -> AccResult {
        match self {
            Accumulator::Count(count) => AccResult::Int {
                value: count,
                has_value: true,
            },
            Accumulator::CountDistinct(seen) => AccResult::Int {
                value: seen.len() as i64,
                has_value: true,
            },
            Accumulator::Sum { sum, has_value } => AccResult::Generic {
                value: sum,
                has_value,
            },
            Accumulator::Avg { sum, count } => {
                if count == 0 {
                    AccResult::Float {
                        value: 0.0,
                        has_value: false,
                    }
                } else {
                    AccResult::Float {
                        value: sum as f64 / count as f64,
                        has_value: true,
                    }
                }
            }
            Accumulator::TimelineCount(buckets) => AccResult::Timeline {
                buckets: buckets.into_iter().sorted().collect(),
            },
        }
    }
}
