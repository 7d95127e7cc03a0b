//! Declarative descriptions of how raw input features become model inputs.
//!
//! Every column turns an [`InputBatch`] into [`SparseRows`]: for each example,
//! the weight rows it activates and the activation value of each. Real-valued
//! columns activate one row per dimension with the raw value; categorical
//! columns (hashed, bucketized, crossed) activate one row per id with value
//! `1.0`; weighted sparse columns reuse hashed ids with caller-provided values.

mod hash;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::input::{FeatureTensor, InputBatch};
use crate::{EstimatorError, Matrix, Result};

pub use hash::{cross_bucket, fingerprint, string_bucket};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealValuedColumn {
    pub name: String,
    pub dimension: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HashedColumn {
    pub name: String,
    pub hash_bucket_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketizedColumn {
    pub source: RealValuedColumn,
    pub boundaries: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossedColumn {
    pub columns: Vec<FeatureColumn>,
    pub hash_bucket_size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedSparseColumn {
    pub sparse: HashedColumn,
    pub weight_feature: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureColumn {
    RealValued(RealValuedColumn),
    Hashed(HashedColumn),
    Bucketized(BucketizedColumn),
    Crossed(CrossedColumn),
    WeightedSparse(WeightedSparseColumn),
}

/// A dense feature of width `dimension`.
pub fn real_valued_column(name: impl Into<String>, dimension: usize) -> FeatureColumn {
    if dimension == 0 {
        panic!("dimension must be > 0, got {}", dimension);
    }
    FeatureColumn::RealValued(RealValuedColumn {
        name: name.into(),
        dimension,
    })
}

/// A categorical string feature hashed into `hash_bucket_size` buckets.
pub fn sparse_column_with_hash_bucket(
    name: impl Into<String>,
    hash_bucket_size: usize,
) -> FeatureColumn {
    if hash_bucket_size == 0 {
        panic!("hash_bucket_size must be > 0, got {}", hash_bucket_size);
    }
    FeatureColumn::Hashed(HashedColumn {
        name: name.into(),
        hash_bucket_size,
    })
}

/// Discretizes a real-valued column. `boundaries` must be strictly ascending.
pub fn bucketized_column(source: FeatureColumn, boundaries: Vec<f64>) -> FeatureColumn {
    let FeatureColumn::RealValued(source) = source else {
        panic!("bucketized_column source must be a real-valued column, got {}", source.name());
    };
    if boundaries.is_empty() {
        panic!("boundaries must not be empty");
    }
    if boundaries.windows(2).any(|w| !(w[0] < w[1])) {
        panic!("boundaries must be sorted in strictly ascending order, got {:?}", boundaries);
    }
    FeatureColumn::Bucketized(BucketizedColumn { source, boundaries })
}

/// Crosses two or more hashed, bucketized or crossed columns.
pub fn crossed_column(columns: Vec<FeatureColumn>, hash_bucket_size: usize) -> FeatureColumn {
    if columns.len() < 2 {
        panic!("crossed_column needs at least 2 columns, got {}", columns.len());
    }
    if let Some(column) = columns.iter().find(|c| !c.is_crossable()) {
        panic!("column {} cannot be crossed", column.name());
    }
    if hash_bucket_size == 0 {
        panic!("hash_bucket_size must be > 0, got {}", hash_bucket_size);
    }
    FeatureColumn::Crossed(CrossedColumn {
        columns,
        hash_bucket_size,
    })
}

/// Uses the values of `weight_feature` as activations for the ids of `sparse`.
pub fn weighted_sparse_column(
    sparse: FeatureColumn,
    weight_feature: impl Into<String>,
) -> FeatureColumn {
    let FeatureColumn::Hashed(sparse) = sparse else {
        panic!("weighted_sparse_column needs a hashed column, got {}", sparse.name());
    };
    FeatureColumn::WeightedSparse(WeightedSparseColumn {
        sparse,
        weight_feature: weight_feature.into(),
    })
}

/// One real-valued column named `""` spanning every column of `x`.
pub fn infer_real_valued_columns_from_input(x: &Matrix) -> Vec<FeatureColumn> {
    vec![real_valued_column("", x.ncols().max(1))]
}

/// One real-valued column per dense feature of `batch`.
pub fn infer_real_valued_columns_from_batch(batch: &InputBatch) -> Vec<FeatureColumn> {
    batch
        .features()
        .iter()
        .filter_map(|(name, tensor)| match tensor {
            FeatureTensor::Dense(m) => Some(real_valued_column(name.clone(), m.ncols().max(1))),
            _ => None,
        })
        .collect()
}

impl FeatureColumn {
    pub fn name(&self) -> String {
        match self {
            FeatureColumn::RealValued(c) => c.name.clone(),
            FeatureColumn::Hashed(c) => c.name.clone(),
            FeatureColumn::Bucketized(c) => format!("{}_bucketized", c.source.name),
            FeatureColumn::Crossed(c) => c
                .columns
                .iter()
                .map(FeatureColumn::name)
                .collect::<Vec<_>>()
                .join("_X_"),
            FeatureColumn::WeightedSparse(c) => {
                format!("{}_weighted_by_{}", c.sparse.name, c.weight_feature)
            }
        }
    }

    /// Number of weight rows this column owns.
    pub fn dimension(&self) -> usize {
        match self {
            FeatureColumn::RealValued(c) => c.dimension,
            FeatureColumn::Hashed(c) => c.hash_bucket_size,
            FeatureColumn::Bucketized(c) => c.source.dimension * (c.boundaries.len() + 1),
            FeatureColumn::Crossed(c) => c.hash_bucket_size,
            FeatureColumn::WeightedSparse(c) => c.sparse.hash_bucket_size,
        }
    }

    /// Whether activations are ids rather than raw dense values.
    pub fn is_categorical(&self) -> bool {
        !matches!(self, FeatureColumn::RealValued(_))
    }

    fn is_crossable(&self) -> bool {
        matches!(
            self,
            FeatureColumn::Hashed(_) | FeatureColumn::Bucketized(_) | FeatureColumn::Crossed(_)
        )
    }

    /// Per-example activations of this column.
    pub fn transform(&self, batch: &InputBatch) -> Result<SparseRows> {
        let n = batch.validate()?;
        match self {
            FeatureColumn::RealValued(c) => {
                let values = dense_feature(batch, &c.name, c.dimension)?;
                let rows = values
                    .rows()
                    .into_iter()
                    .map(|row| row.iter().copied().enumerate().collect())
                    .collect();
                Ok(SparseRows { rows })
            }
            FeatureColumn::WeightedSparse(c) => weighted_rows(batch, c, n),
            _ => {
                let rows = self
                    .categorical_ids(batch, n)?
                    .into_iter()
                    .map(|ids| ids.into_iter().map(|id| (id, 1.0)).collect())
                    .collect();
                Ok(SparseRows { rows })
            }
        }
    }

    fn categorical_ids(&self, batch: &InputBatch, n: usize) -> Result<Vec<Vec<usize>>> {
        match self {
            FeatureColumn::Hashed(c) => hashed_ids(batch, c, n),
            FeatureColumn::Bucketized(c) => {
                let values = dense_feature(batch, &c.source.name, c.source.dimension)?;
                let n_buckets = c.boundaries.len() + 1;
                Ok(values
                    .rows()
                    .into_iter()
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .map(|(d, &v)| d * n_buckets + c.boundaries.partition_point(|&b| b <= v))
                            .collect()
                    })
                    .collect())
            }
            FeatureColumn::Crossed(c) => {
                let parts = c
                    .columns
                    .iter()
                    .map(|column| column.categorical_ids(batch, n))
                    .collect::<Result<Vec<_>>>()?;
                Ok((0..n)
                    .map(|row| {
                        let mut tuples: Vec<Vec<usize>> = vec![Vec::new()];
                        for part in &parts {
                            tuples = tuples
                                .iter()
                                .flat_map(|prefix| {
                                    part[row].iter().map(move |&id| {
                                        let mut tuple = prefix.clone();
                                        tuple.push(id);
                                        tuple
                                    })
                                })
                                .collect();
                        }
                        tuples
                            .iter()
                            .map(|tuple| cross_bucket(tuple, c.hash_bucket_size))
                            .collect()
                    })
                    .collect())
            }
            other => Err(EstimatorError::FeatureType {
                name: other.name(),
                expected: "categorical column",
                actual: "real-valued column",
            }),
        }
    }
}

fn dense_feature<'a>(batch: &'a InputBatch, name: &str, dimension: usize) -> Result<&'a Matrix> {
    let values = batch.dense(name)?;
    if values.ncols() != dimension {
        return Err(EstimatorError::ShapeMismatch {
            name: name.to_string(),
            expected: format!("{} columns", dimension),
            actual: format!("{} columns", values.ncols()),
        });
    }
    Ok(values)
}

/// Row `row` of a per-example buffer; sparse indices past the batch are a shape error.
fn example_row<'a, T>(rows: &'a mut [Vec<T>], row: usize, name: &str) -> Result<&'a mut Vec<T>> {
    let n = rows.len();
    rows.get_mut(row).ok_or_else(|| EstimatorError::ShapeMismatch {
        name: name.to_string(),
        expected: format!("{} rows", n),
        actual: format!("index in row {}", row),
    })
}

fn hashed_ids(batch: &InputBatch, column: &HashedColumn, n: usize) -> Result<Vec<Vec<usize>>> {
    let mut ids = vec![Vec::new(); n];
    match batch.feature(&column.name)? {
        FeatureTensor::SparseStrings(tensor) => {
            for ([row, _], value) in tensor.iter() {
                example_row(&mut ids, row, &column.name)?
                    .push(string_bucket(value, column.hash_bucket_size));
            }
        }
        FeatureTensor::Strings(values) => {
            for (row, value) in values.iter().enumerate() {
                ids[row].push(string_bucket(value, column.hash_bucket_size));
            }
        }
        other => {
            return Err(EstimatorError::FeatureType {
                name: column.name.clone(),
                expected: "sparse strings",
                actual: other.kind(),
            });
        }
    }
    Ok(ids)
}

fn weighted_rows(batch: &InputBatch, column: &WeightedSparseColumn, n: usize) -> Result<SparseRows> {
    let ids = match batch.feature(&column.sparse.name)? {
        FeatureTensor::SparseStrings(ids) => ids,
        other => {
            return Err(EstimatorError::FeatureType {
                name: column.sparse.name.clone(),
                expected: "sparse strings",
                actual: other.kind(),
            });
        }
    };
    let weights = match batch.feature(&column.weight_feature)? {
        FeatureTensor::SparseFloats(weights) => weights,
        other => {
            return Err(EstimatorError::FeatureType {
                name: column.weight_feature.clone(),
                expected: "sparse floats",
                actual: other.kind(),
            });
        }
    };
    let weight_at: BTreeMap<[usize; 2], f64> = weights.iter().map(|(i, &w)| (i, w)).collect();

    let mut rows = vec![Vec::new(); n];
    for (index, value) in ids.iter() {
        let weight = weight_at
            .get(&index)
            .ok_or_else(|| EstimatorError::ShapeMismatch {
                name: column.weight_feature.clone(),
                expected: format!("a weight at {:?}", index),
                actual: "none".to_string(),
            })?;
        let id = string_bucket(value, column.sparse.hash_bucket_size);
        example_row(&mut rows, index[0], &column.sparse.name)?.push((id, *weight));
    }
    Ok(SparseRows { rows })
}

/// Activations of one column: for every example, `(weight row, value)` pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseRows {
    rows: Vec<Vec<(usize, f64)>>,
}

impl SparseRows {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, example: usize) -> &[(usize, f64)] {
        &self.rows[example]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[(usize, f64)]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Shifts every id by `offset`, used when columns share one joint variable.
    pub(crate) fn offset(mut self, offset: usize) -> Self {
        for row in &mut self.rows {
            for (id, _) in row.iter_mut() {
                *id += offset;
            }
        }
        self
    }
}
