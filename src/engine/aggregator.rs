use std::collections::HashMap;

use fnv::FnvHashMap;
use log::error;

use crate::engine::accumulator::{AccResult, Accumulator};
use crate::engine::api::{
    AggOp, TableQuery, TableQueryResult, TimelineBucket, TimelineQuery, TimelineQueryResult,
    TimelineSeries,
};
use crate::engine::hasher::{AggBucket, Hasher};
use crate::mem_store::block::BlockQueryResult;
use crate::mem_store::strings::{StrId, StringDict};

/// Everything the aggregation pass needs to know about the query: the op,
/// how the projected int columns split into groupby prefix and aggregated
/// suffix, and the bucketing parameters for timeline queries.
pub(crate) struct AggCtx {
    pub op: AggOp,
    pub groupby_int_cnt: usize,
    pub groupby_str_cnt: usize,
    pub agg_col_cnt: usize,
    pub timeline: Option<TimelineSpec>,
}

pub(crate) struct TimelineSpec {
    pub start_ts: i64,
    pub gran_secs: i64,
}

/// Aggregation output keyed by group hash, with `order` capturing the
/// first-seen order the reply tensors are emitted in.
pub(crate) struct Aggregation {
    order: Vec<u64>,
    buckets: FnvHashMap<u64, AggBucket>,
    results: FnvHashMap<u64, Vec<AccResult>>,
}

/// Runs the two-phase aggregation over all filtered block results: per block
/// feed rows into per-hash accumulator slices, then merge each block's
/// partials into the table-level state (first occurrence moves, later ones
/// merge associatively). Returns `None` when no group was produced.
pub(crate) fn aggregate(ctx: &AggCtx, block_results: &[BlockQueryResult]) -> Option<Aggregation> {
    let mut order: Vec<u64> = Vec::new();
    let mut buckets: FnvHashMap<u64, AggBucket> = FnvHashMap::default();
    let mut table_accs: FnvHashMap<u64, Vec<Accumulator>> = FnvHashMap::default();

    for result in block_results {
        let hasher = Hasher::for_block(result, ctx.groupby_int_cnt, ctx.groupby_str_cnt);

        let mut block_accs: FnvHashMap<u64, Vec<Accumulator>> = FnvHashMap::default();
        for &hash in hasher.hashes() {
            if block_accs.contains_key(&hash) {
                continue;
            }
            block_accs.insert(hash, Accumulator::new_slice(ctx.op, ctx.agg_col_cnt));
            // Register the table-level bucket here rather than after all
            // blocks: only this block's hasher knows a representative row.
            if !buckets.contains_key(&hash) {
                match hasher.agg_bucket(hash) {
                    Some(bucket) => {
                        order.push(hash);
                        buckets.insert(hash, bucket);
                    }
                    None => error!("no representative row for group hash {}", hash),
                }
            }
        }

        for agg_idx in 0..ctx.agg_col_cnt {
            let col_idx = ctx.groupby_int_cnt + agg_idx;
            let values = &result.int.matrix[col_idx];
            let has_value = &result.int.has_value[col_idx];
            for (row_idx, &hash) in hasher.hashes().iter().enumerate() {
                if !has_value[row_idx] {
                    continue; // null cells never reach an accumulator
                }
                let value = match &ctx.timeline {
                    Some(spec) => (values[row_idx] - spec.start_ts) / spec.gran_secs,
                    None => values[row_idx],
                };
                block_accs.get_mut(&hash).unwrap()[agg_idx].add(value);
            }
        }

        for (hash, accs) in block_accs {
            match table_accs.entry(hash) {
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(accs);
                }
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    for (table_acc, block_acc) in occupied.get_mut().iter_mut().zip(accs) {
                        table_acc.merge(block_acc);
                    }
                }
            }
        }
    }

    if order.is_empty() {
        return None;
    }

    let results = table_accs
        .into_iter()
        .map(|(hash, accs)| (hash, accs.into_iter().map(Accumulator::finalize).collect()))
        .collect();

    Some(Aggregation {
        order,
        buckets,
        results,
    })
}

/// Groupby columns of the reply, laid out column-major over the groups in
/// first-seen order, plus the string id map covering every emitted id.
struct GroupbyTensor {
    int_result: Vec<i64>,
    int_has_value: Vec<bool>,
    str_result: Vec<StrId>,
    str_has_value: Vec<bool>,
    str_id_map: HashMap<StrId, String>,
}

fn emit_groupby(
    strings: &StringDict,
    agg: &Aggregation,
    groupby_int_cnt: usize,
    groupby_str_cnt: usize,
) -> GroupbyTensor {
    let group_count = agg.order.len();
    let mut tensor = GroupbyTensor {
        int_result: vec![0; groupby_int_cnt * group_count],
        int_has_value: vec![false; groupby_int_cnt * group_count],
        str_result: vec![0; groupby_str_cnt * group_count],
        str_has_value: vec![false; groupby_str_cnt * group_count],
        str_id_map: HashMap::new(),
    };

    for (group_idx, hash) in agg.order.iter().enumerate() {
        let bucket = &agg.buckets[hash];
        debug_assert_eq!(bucket.hash, *hash);
        for col_idx in 0..groupby_int_cnt {
            tensor.int_result[col_idx * group_count + group_idx] = bucket.int_vals[col_idx];
            tensor.int_has_value[col_idx * group_count + group_idx] = bucket.int_has_val[col_idx];
        }
        for col_idx in 0..groupby_str_cnt {
            let str_id = bucket.str_vals[col_idx];
            tensor.str_result[col_idx * group_count + group_idx] = str_id;
            tensor.str_has_value[col_idx * group_count + group_idx] = bucket.str_has_val[col_idx];
            if bucket.str_has_val[col_idx] {
                if let Some(value) = strings.lookup_str(str_id) {
                    tensor.str_id_map.insert(str_id, value);
                }
            }
        }
    }

    tensor
}

pub(crate) fn assemble_table_result(
    strings: &StringDict,
    query: &TableQuery,
    agg: Aggregation,
) -> TableQueryResult {
    let group_count = agg.order.len();
    let agg_col_cnt = query.agg_int_column_names.len();
    let groupby = emit_groupby(
        strings,
        &agg,
        query.groupby_int_column_names.len(),
        query.groupby_str_column_names.len(),
    );

    let is_float = query.agg_op == AggOp::Avg;
    let (int_len, float_len) = if is_float {
        (0, agg_col_cnt * group_count)
    } else {
        (agg_col_cnt * group_count, 0)
    };
    let mut agg_int_result = vec![0i64; int_len];
    let mut agg_int_has_value = vec![false; int_len];
    let mut agg_float_result = vec![0f64; float_len];
    let mut agg_float_has_value = vec![false; float_len];

    for (group_idx, hash) in agg.order.iter().enumerate() {
        let results = &agg.results[hash];
        for (agg_idx, result) in results.iter().enumerate() {
            let slot = agg_idx * group_count + group_idx;
            match *result {
                AccResult::Int { value, has_value } | AccResult::Generic { value, has_value } => {
                    agg_int_result[slot] = value;
                    agg_int_has_value[slot] = has_value;
                }
                AccResult::Float { value, has_value } => {
                    agg_float_result[slot] = value;
                    agg_float_has_value[slot] = has_value;
                }
                AccResult::Timeline { .. } => {
                    error!("timeline result in table query aggregation");
                }
            }
        }
    }

    TableQueryResult {
        count: group_count,
        int_column_names: query.groupby_int_column_names.clone(),
        int_result: groupby.int_result,
        int_has_value: groupby.int_has_value,
        str_column_names: query.groupby_str_column_names.clone(),
        str_id_map: groupby.str_id_map,
        str_result: groupby.str_result,
        str_has_value: groupby.str_has_value,
        agg_int_column_names: if is_float {
            Vec::new()
        } else {
            query.agg_int_column_names.clone()
        },
        agg_int_result,
        agg_int_has_value,
        agg_float_column_names: if is_float {
            query.agg_int_column_names.clone()
        } else {
            Vec::new()
        },
        agg_float_result,
        agg_float_has_value,
    }
}

pub(crate) fn assemble_timeline_result(
    strings: &StringDict,
    query: &TimelineQuery,
    agg: Aggregation,
) -> TimelineQueryResult {
    let groupby = emit_groupby(
        strings,
        &agg,
        query.groupby_int_column_names.len(),
        query.groupby_str_column_names.len(),
    );

    let timelines = agg
        .order
        .iter()
        .map(|hash| match agg.results[hash].first() {
            Some(AccResult::Timeline { buckets }) => TimelineSeries {
                buckets: buckets
                    .iter()
                    .map(|&(ts_bucket, count)| TimelineBucket { ts_bucket, count })
                    .collect(),
            },
            other => {
                error!("non-timeline result in timeline aggregation: {:?}", other);
                TimelineSeries::default()
            }
        })
        .collect();

    TimelineQueryResult {
        count: agg.order.len(),
        int_column_names: query.groupby_int_column_names.clone(),
        int_result: groupby.int_result,
        int_has_value: groupby.int_has_value,
        str_column_names: query.groupby_str_column_names.clone(),
        str_id_map: groupby.str_id_map,
        str_result: groupby.str_result,
        str_has_value: groupby.str_has_value,
        timelines,
    }
}

#[cfg(test)]
mod tests {
    use fnv::FnvHashSet;

    use super::*;
    use crate::mem_store::numeric_store::NumericResult;

    /// One groupby int column and one aggregated int column.
    fn block_result(groups: Vec<i64>, values: Vec<(i64, bool)>) -> BlockQueryResult {
        let count = groups.len();
        let (vals, has): (Vec<i64>, Vec<bool>) = values.into_iter().unzip();
        BlockQueryResult {
            count,
            int: NumericResult {
                matrix: vec![groups, vals],
                has_value: vec![vec![true; count], has],
            },
            str: NumericResult {
                matrix: vec![],
                has_value: vec![],
            },
            str_ids_seen: FnvHashSet::default(),
        }
    }

    fn ctx(op: AggOp) -> AggCtx {
        AggCtx {
            op,
            groupby_int_cnt: 1,
            groupby_str_cnt: 0,
            agg_col_cnt: 1,
            timeline: None,
        }
    }

    fn finalized(agg: &Aggregation) -> Vec<(i64, AccResult)> {
        agg.order
            .iter()
            .map(|hash| (agg.buckets[hash].int_vals[0], agg.results[hash][0].clone()))
            .collect()
    }

    #[test]
    fn sums_per_group_across_blocks() {
        let blocks = vec![
            block_result(vec![1, 2, 1], vec![(2, true), (3, true), (2, true)]),
            block_result(vec![1], vec![(5, true)]),
        ];
        let agg = aggregate(&ctx(AggOp::Sum), &blocks).unwrap();
        let mut groups = finalized(&agg);
        groups.sort_by_key(|(group, _)| *group);
        assert_eq!(
            groups,
            vec![
                (
                    1,
                    AccResult::Generic {
                        value: 9,
                        has_value: true
                    }
                ),
                (
                    2,
                    AccResult::Generic {
                        value: 3,
                        has_value: true
                    }
                ),
            ]
        );
    }

    #[test]
    fn null_agg_cells_are_skipped() {
        let blocks = vec![block_result(vec![1, 1], vec![(2, true), (0, false)])];
        let agg = aggregate(&ctx(AggOp::Count), &blocks).unwrap();
        assert_eq!(
            finalized(&agg)[0].1,
            AccResult::Int {
                value: 1,
                has_value: true
            }
        );
    }

    #[test]
    fn no_groups_means_no_result() {
        assert!(aggregate(&ctx(AggOp::Count), &[]).is_none());
    }

    #[test]
    fn partition_invariance() {
        // splitting the same rows across blocks differently must not change
        // the finalized results
        let one_block = vec![block_result(
            vec![1, 1, 2, 1],
            vec![(2, true), (5, true), (3, true), (4, true)],
        )];
        let two_blocks = vec![
            block_result(vec![1, 1], vec![(2, true), (5, true)]),
            block_result(vec![2, 1], vec![(3, true), (4, true)]),
        ];
        for op in [AggOp::Count, AggOp::CountDistinct, AggOp::Sum, AggOp::Avg] {
            let a = aggregate(&ctx(op), &one_block).unwrap();
            let b = aggregate(&ctx(op), &two_blocks).unwrap();
            let mut fa = finalized(&a);
            let mut fb = finalized(&b);
            fa.sort_by_key(|(group, _)| *group);
            fb.sort_by_key(|(group, _)| *group);
            assert_eq!(fa, fb, "op {:?}", op);
        }
    }

    #[test]
    fn timeline_bucketing() {
        let blocks = vec![block_result(vec![1, 1], vec![(2, true), (500, true)])];
        let timeline_ctx = AggCtx {
            op: AggOp::TimelineCount,
            groupby_int_cnt: 1,
            groupby_str_cnt: 0,
            agg_col_cnt: 1,
            timeline: Some(TimelineSpec {
                start_ts: 0,
                gran_secs: 300,
            }),
        };
        let agg = aggregate(&timeline_ctx, &blocks).unwrap();
        assert_eq!(agg.order.len(), 1);
        assert_eq!(
            finalized(&agg)[0].1,
            AccResult::Timeline {
                buckets: vec![(0, 1), (1, 1)]
            }
        );
    }

    #[test]
    fn table_result_layout_is_column_major() {
        let blocks = vec![block_result(
            vec![1, 2, 1],
            vec![(10, true), (20, true), (30, true)],
        )];
        let agg = aggregate(&ctx(AggOp::Sum), &blocks).unwrap();
        let strings = StringDict::new(4);
        let query = TableQuery {
            min_ts: 0,
            groupby_int_column_names: vec!["group".to_string()],
            agg_int_column_names: vec!["value".to_string()],
            agg_op: AggOp::Sum,
            ..TableQuery::default()
        };
        let result = assemble_table_result(&strings, &query, agg);
        assert_eq!(result.count, 2);
        // first-seen group order: 1, then 2
        assert_eq!(result.int_result, vec![1, 2]);
        assert_eq!(result.agg_int_result, vec![40, 20]);
        assert_eq!(result.agg_int_has_value, vec![true, true]);
        assert_eq!(result.agg_int_column_names, vec!["value"]);
        assert!(result.agg_float_column_names.is_empty());
        assert!(result.agg_float_result.is_empty());
    }

    #[test]
    fn avg_goes_to_float_buffers() {
        let blocks = vec![block_result(vec![1, 1], vec![(1, true), (2, true)])];
        let agg = aggregate(&ctx(AggOp::Avg), &blocks).unwrap();
        let strings = StringDict::new(4);
        let query = TableQuery {
            min_ts: 0,
            groupby_int_column_names: vec!["group".to_string()],
            agg_int_column_names: vec!["value".to_string()],
            agg_op: AggOp::Avg,
            ..TableQuery::default()
        };
        let result = assemble_table_result(&strings, &query, agg);
        assert!(result.agg_int_result.is_empty());
        assert!(result.agg_int_column_names.is_empty());
        assert_eq!(result.agg_float_column_names, vec!["value"]);
        assert_eq!(result.agg_float_result, vec![1.5]);
        assert_eq!(result.agg_float_has_value, vec![true]);
    }
}
