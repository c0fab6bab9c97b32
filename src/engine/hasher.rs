use fnv::FnvHashMap;

use crate::mem_store::block::BlockQueryResult;
use crate::mem_store::strings::StrId;

/// The groupby-column values of one output group, captured from a
/// representative row of the first block that produced the group's hash.
#[derive(Clone, Debug)]
pub(crate) struct AggBucket {
    pub hash: u64,
    pub int_vals: Vec<i64>,
    pub int_has_val: Vec<bool>,
    pub str_vals: Vec<StrId>,
    pub str_has_val: Vec<bool>,
}

/// Computes a 64-bit groupby fingerprint for every surviving row of one
/// block result. Groupby int columns come first in the int result matrix;
/// string columns are all groupby columns (aggregation over strings is not
/// supported). String ids are folded as plain u64s.
///
/// A null cell folds its zero backing value a second time, which keeps
/// "present with value 0" and "absent" in different groups. This is the
/// defined behavior even though it gives null the same fingerprint as a
/// value that happens to double-fold to the same bits.
pub(crate) struct Hasher<'a> {
    result: &'a BlockQueryResult,
    groupby_int_cnt: usize,
    groupby_str_cnt: usize,
    hashes: Vec<u64>,
    hash_to_row: FnvHashMap<u64, usize>,
}

impl<'a> Hasher<'a> {
    pub fn for_block(
        result: &'a BlockQueryResult,
        groupby_int_cnt: usize,
        groupby_str_cnt: usize,
    ) -> Hasher<'a> {
        let mut hashes = vec![0u64; result.count];

        for col_idx in 0..groupby_int_cnt {
            let values = &result.int.matrix[col_idx];
            let has_value = &result.int.has_value[col_idx];
            for (row_idx, hash) in hashes.iter_mut().enumerate() {
                *hash = hash128_to_64(*hash, values[row_idx] as u64);
                if !has_value[row_idx] {
                    *hash = hash128_to_64(*hash, values[row_idx] as u64);
                }
            }
        }
        for col_idx in 0..groupby_str_cnt {
            let values = &result.str.matrix[col_idx];
            let has_value = &result.str.has_value[col_idx];
            for (row_idx, hash) in hashes.iter_mut().enumerate() {
                *hash = hash128_to_64(*hash, u64::from(values[row_idx]));
                if !has_value[row_idx] {
                    *hash = hash128_to_64(*hash, u64::from(values[row_idx]));
                }
            }
        }

        // last row wins as the representative of its hash
        let mut hash_to_row = FnvHashMap::default();
        for (row_idx, &hash) in hashes.iter().enumerate() {
            hash_to_row.insert(hash, row_idx);
        }

        Hasher {
            result,
            groupby_int_cnt,
            groupby_str_cnt,
            hashes,
            hash_to_row,
        }
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// Builds the bucket template for `hash` from its representative row.
    pub fn agg_bucket(&self, hash: u64) -> Option<AggBucket> {
        let &row_idx = self.hash_to_row.get(&hash)?;

        let mut bucket = AggBucket {
            hash,
            int_vals: Vec::with_capacity(self.groupby_int_cnt),
            int_has_val: Vec::with_capacity(self.groupby_int_cnt),
            str_vals: Vec::with_capacity(self.groupby_str_cnt),
            str_has_val: Vec::with_capacity(self.groupby_str_cnt),
        };
        for col_idx in 0..self.groupby_int_cnt {
            bucket.int_vals.push(self.result.int.matrix[col_idx][row_idx]);
            bucket
                .int_has_val
                .push(self.result.int.has_value[col_idx][row_idx]);
        }
        for col_idx in 0..self.groupby_str_cnt {
            bucket.str_vals.push(self.result.str.matrix[col_idx][row_idx]);
            bucket
                .str_has_val
                .push(self.result.str.has_value[col_idx][row_idx]);
        }
        Some(bucket)
    }
}

/// Two-round multiply-shift-xor reduction of a 128-bit input to 64 bits.
pub(crate) fn hash128_to_64(upper: u64, lower: u64) -> u64 {
    const K_MUL: u64 = 0x9ddfea08eb382d69;
    let mut a = (lower ^ upper).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (upper ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}
