//! Input batches and the sources that feed them to estimators.
//!
//! An [`InputBatch`] maps feature names to dense or sparse tensors and carries
//! an optional label column. Estimators pull batches from an [`InputFn`]: a
//! repeating batch, an epoch-limited batch, mini-batches over arrays, or any
//! closure returning `Option<InputBatch>`.

use std::collections::BTreeMap;

use ndarray::{ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{EstimatorError, Matrix, Result, Vector};

/// COO sparse tensor of rank 2: `values[i]` lives at `indices[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseTensor<T> {
    pub indices: Vec<[usize; 2]>,
    pub values: Vec<T>,
    pub dense_shape: [usize; 2],
}

impl<T> SparseTensor<T> {
    pub fn new(indices: Vec<[usize; 2]>, values: Vec<T>, dense_shape: [usize; 2]) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(EstimatorError::ShapeMismatch {
                name: "sparse tensor".to_string(),
                expected: format!("{} values", indices.len()),
                actual: format!("{} values", values.len()),
            });
        }
        if let Some(index) = indices
            .iter()
            .find(|[row, col]| *row >= dense_shape[0] || *col >= dense_shape[1])
        {
            return Err(EstimatorError::ShapeMismatch {
                name: "sparse tensor".to_string(),
                expected: format!("indices within {:?}", dense_shape),
                actual: format!("{:?}", index),
            });
        }
        Ok(Self {
            indices,
            values,
            dense_shape,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.dense_shape[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = ([usize; 2], &T)> {
        self.indices.iter().copied().zip(self.values.iter())
    }
}

/// A named input value.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureTensor {
    /// `n_examples x dimension` numeric values.
    Dense(Matrix),
    /// Categorical string values.
    SparseStrings(SparseTensor<String>),
    /// Numeric sparse values, e.g. the weights of a weighted sparse column.
    SparseFloats(SparseTensor<f64>),
    /// One string per example, e.g. example ids.
    Strings(Vec<String>),
}

impl FeatureTensor {
    pub fn n_rows(&self) -> usize {
        match self {
            FeatureTensor::Dense(m) => m.nrows(),
            FeatureTensor::SparseStrings(t) => t.n_rows(),
            FeatureTensor::SparseFloats(t) => t.n_rows(),
            FeatureTensor::Strings(v) => v.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeatureTensor::Dense(_) => "dense",
            FeatureTensor::SparseStrings(_) => "sparse strings",
            FeatureTensor::SparseFloats(_) => "sparse floats",
            FeatureTensor::Strings(_) => "strings",
        }
    }
}

/// Features by name plus an optional `n x 1` label column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputBatch {
    features: BTreeMap<String, FeatureTensor>,
    labels: Option<Matrix>,
}

impl InputBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, name: impl Into<String>, tensor: FeatureTensor) -> Self {
        self.features.insert(name.into(), tensor);
        self
    }

    pub fn with_dense(self, name: impl Into<String>, values: Matrix) -> Self {
        self.with_feature(name, FeatureTensor::Dense(values))
    }

    /// One value per example, stored as an `n x 1` dense feature.
    pub fn with_column(self, name: impl Into<String>, values: &[f64]) -> Self {
        self.with_dense(name, Vector::from(values.to_vec()).insert_axis(Axis(1)))
    }

    pub fn with_sparse_strings(self, name: impl Into<String>, tensor: SparseTensor<String>) -> Self {
        self.with_feature(name, FeatureTensor::SparseStrings(tensor))
    }

    pub fn with_sparse_floats(self, name: impl Into<String>, tensor: SparseTensor<f64>) -> Self {
        self.with_feature(name, FeatureTensor::SparseFloats(tensor))
    }

    pub fn with_strings<S: Into<String>>(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.with_feature(name, FeatureTensor::Strings(values))
    }

    /// Labels of shape `[n, 1]`.
    pub fn with_labels(mut self, labels: Matrix) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Labels of shape `[n]`; stored as `[n, 1]`.
    pub fn with_label_values(self, labels: &[f64]) -> Self {
        let labels = Vector::from(labels.to_vec()).insert_axis(Axis(1));
        self.with_labels(labels)
    }

    pub fn features(&self) -> &BTreeMap<String, FeatureTensor> {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Result<&FeatureTensor> {
        self.features
            .get(name)
            .ok_or_else(|| EstimatorError::MissingFeature(name.to_string()))
    }

    pub fn dense(&self, name: &str) -> Result<&Matrix> {
        match self.feature(name)? {
            FeatureTensor::Dense(m) => Ok(m),
            other => Err(EstimatorError::FeatureType {
                name: name.to_string(),
                expected: "dense",
                actual: other.kind(),
            }),
        }
    }

    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    /// The label column as a vector view.
    pub fn labels(&self) -> Result<ArrayView1<'_, f64>> {
        let labels = self.labels.as_ref().ok_or(EstimatorError::MissingLabels)?;
        if labels.ncols() != 1 {
            return Err(EstimatorError::ShapeMismatch {
                name: "labels".to_string(),
                expected: format!("[{}, 1]", labels.nrows()),
                actual: format!("{:?}", labels.shape()),
            });
        }
        Ok(labels.column(0))
    }

    /// Number of examples: label rows when labelled, else the first feature's rows.
    pub fn n_examples(&self) -> usize {
        if let Some(labels) = &self.labels {
            return labels.nrows();
        }
        self.features
            .values()
            .find(|t| matches!(t, FeatureTensor::Dense(_)))
            .or_else(|| self.features.values().next())
            .map(FeatureTensor::n_rows)
            .unwrap_or(0)
    }

    /// Checks that every feature and the labels agree on the number of examples.
    pub fn validate(&self) -> Result<usize> {
        let n = self.n_examples();
        for (name, tensor) in &self.features {
            if tensor.n_rows() != n {
                return Err(EstimatorError::ShapeMismatch {
                    name: name.clone(),
                    expected: format!("{} rows", n),
                    actual: format!("{} rows", tensor.n_rows()),
                });
            }
        }
        Ok(n)
    }

    /// An input that yields this batch forever.
    pub fn repeat(self) -> RepeatInput {
        RepeatInput {
            batch: self,
            remaining: None,
        }
    }

    /// An input that yields this batch `num_epochs` times.
    pub fn epochs(self, num_epochs: usize) -> RepeatInput {
        RepeatInput {
            batch: self,
            remaining: Some(num_epochs),
        }
    }
}

/// Source of training, evaluation or prediction batches.
///
/// `None` signals that the input is exhausted.
pub trait InputFn {
    fn next_batch(&mut self) -> Option<InputBatch>;
}

impl<F> InputFn for F
where
    F: FnMut() -> Option<InputBatch>,
{
    fn next_batch(&mut self) -> Option<InputBatch> {
        self()
    }
}

/// Repeats one batch, optionally for a bounded number of epochs.
#[derive(Clone, Debug)]
pub struct RepeatInput {
    batch: InputBatch,
    remaining: Option<usize>,
}

impl InputFn for RepeatInput {
    fn next_batch(&mut self) -> Option<InputBatch> {
        match &mut self.remaining {
            None => Some(self.batch.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.batch.clone())
            }
        }
    }
}

/// Mini-batches over an in-memory feature matrix and label vector.
///
/// Features are published under the empty name `""`, the name produced by
/// [`infer_real_valued_columns_from_input`](crate::infer_real_valued_columns_from_input).
#[derive(Clone, Debug)]
pub struct ArrayInput {
    x: Matrix,
    y: Option<Vector>,
    batch_size: usize,
    shuffle: bool,
    num_epochs: Option<usize>,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
}

impl ArrayInput {
    pub fn new(x: Matrix, y: Option<Vector>) -> Self {
        let n = x.nrows();
        Self {
            x,
            y,
            batch_size: n.max(1),
            shuffle: false,
            num_epochs: None,
            rng: StdRng::seed_from_u64(0),
            order: (0..n).collect(),
            cursor: 0,
            epoch: 0,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        if batch_size == 0 {
            panic!("batch_size must be > 0, got {}", batch_size);
        }
        self.batch_size = batch_size;
        self
    }

    /// Shuffle examples every epoch with the given seed.
    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng = StdRng::seed_from_u64(seed);
        self.order.shuffle(&mut self.rng);
        self
    }

    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = Some(num_epochs);
        self
    }
}

impl InputFn for ArrayInput {
    fn next_batch(&mut self) -> Option<InputBatch> {
        let n = self.x.nrows();
        if n == 0 {
            return None;
        }
        if self.cursor >= n {
            self.epoch += 1;
            self.cursor = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }
        if self.num_epochs.is_some_and(|limit| self.epoch >= limit) {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(n);
        let rows = &self.order[self.cursor..end];
        self.cursor = end;

        let mut batch = InputBatch::new().with_dense("", self.x.select(Axis(0), rows));
        if let Some(y) = &self.y {
            batch = batch.with_labels(y.select(Axis(0), rows).insert_axis(Axis(1)));
        }
        Some(batch)
    }
}
