//! Row-sharded storage for large weight variables.
//!
//! A variable is split into contiguous row ranges ("shards"). The number of
//! shards is chosen so each holds at least `min_slice_size` bytes, capped by the
//! number of parameter-server replicas. Shards only materialize rows that were
//! written, so a huge hashed column costs memory proportional to the ids seen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Matrix;

/// Bytes per stored element when sizing shards (single-precision weights).
const ELEMENT_BYTES: usize = 4;

/// Shard count for a `rows x cols` variable.
pub fn num_partitions(rows: usize, cols: usize, max_partitions: usize, min_slice_size: usize) -> usize {
    let bytes = rows.saturating_mul(cols).saturating_mul(ELEMENT_BYTES);
    let wanted = bytes.div_ceil(min_slice_size.max(1));
    wanted.clamp(1, max_partitions.max(1)).min(rows.max(1))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Shard {
    start: usize,
    end: usize,
    rows: BTreeMap<usize, Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionedVariable {
    rows: usize,
    cols: usize,
    shards: Vec<Shard>,
}

impl PartitionedVariable {
    pub fn new(rows: usize, cols: usize, max_partitions: usize, min_slice_size: usize) -> Self {
        let n_shards = num_partitions(rows, cols, max_partitions, min_slice_size);
        let base = rows / n_shards;
        let extra = rows % n_shards;

        let mut shards = Vec::with_capacity(n_shards);
        let mut start = 0;
        for i in 0..n_shards {
            let len = base + usize::from(i < extra);
            shards.push(Shard {
                start,
                end: start + len,
                rows: BTreeMap::new(),
            });
            start += len;
        }
        Self { rows, cols, shards }
    }

    /// A single-shard variable.
    pub fn unpartitioned(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, 1, usize::MAX)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.end - s.start).collect()
    }

    /// Rows actually stored across all shards.
    pub fn materialized_rows(&self) -> usize {
        self.shards.iter().map(|s| s.rows.len()).sum()
    }

    fn shard_index(&self, row: usize) -> usize {
        self.shards.partition_point(|s| s.end <= row)
    }

    /// The stored row, or `None` if it was never written (all zeros).
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        let shard = self.shards.get(self.shard_index(row))?;
        shard.rows.get(&row).map(Vec::as_slice)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row).map_or(0.0, |values| values[col])
    }

    /// Mutable access to a row, materializing it as zeros on first write.
    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        assert!(row < self.rows, "row {} out of bounds for {} rows", row, self.rows);
        let index = self.shard_index(row);
        let cols = self.cols;
        self.shards[index]
            .rows
            .entry(row)
            .or_insert_with(|| vec![0.0; cols])
    }

    /// Stored rows in ascending order.
    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, &[f64])> {
        self.shards
            .iter()
            .flat_map(|s| s.rows.iter().map(|(&r, values)| (r, values.as_slice())))
    }

    pub fn to_dense(&self) -> Matrix {
        let mut dense = Matrix::zeros((self.rows, self.cols));
        for (row, values) in self.iter_rows() {
            for (col, &value) in values.iter().enumerate() {
                dense[[row, col]] = value;
            }
        }
        dense
    }
}
