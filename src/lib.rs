//! Linear estimators over declarative feature columns.
//!
//! A [`LinearClassifier`] or [`LinearRegressor`] maps named input features
//! through [`FeatureColumn`]s (real-valued, hash-bucketed, bucketized, crossed,
//! weighted) into a sparse linear model, trains it with FTRL, Adagrad, SGD or
//! SDCA, and exposes `fit` / `evaluate` / `predict` / `export`.
//!
//! # Example
//! ```rust
//! use linear_estimator::{
//!     real_valued_column, sparse_column_with_hash_bucket, Estimator, InputBatch,
//!     LinearClassifier, Metrics, SparseTensor,
//! };
//!
//! let batch = InputBatch::new()
//!     .with_column("age", &[1.0])
//!     .with_sparse_strings(
//!         "language",
//!         SparseTensor::new(vec![[0, 0]], vec!["english".to_string()], [1, 1]).unwrap(),
//!     )
//!     .with_label_values(&[1.0]);
//!
//! let mut classifier = LinearClassifier::new(vec![
//!     real_valued_column("age", 1),
//!     sparse_column_with_hash_bucket("language", 100),
//! ]);
//! classifier.fit(&mut batch.clone().repeat(), 100).unwrap();
//! let scores = classifier
//!     .evaluate(&mut batch.repeat(), Some(1), &Metrics::new())
//!     .unwrap();
//! assert!(scores["loss"] < 0.1);
//! ```

pub use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod feature_column;
pub mod head;
pub mod input;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod partition;

pub type Vector = Array1<f64>;
pub type Matrix = Array2<f64>;

pub use checkpoint::ExportedModel;
pub use config::RunConfig;
pub use dataset::{load_iris, load_iris_binary, make_regression, random_weights, Dataset};
pub use error::{EstimatorError, Result};
pub use estimator::{
    Estimator, LinearClassifier, LinearRegressor, MetricKey, MetricSpec, Metrics,
};
pub use feature_column::{
    bucketized_column, crossed_column, infer_real_valued_columns_from_batch,
    infer_real_valued_columns_from_input, real_valued_column, sparse_column_with_hash_bucket,
    weighted_sparse_column, FeatureColumn, SparseRows,
};
pub use head::{Head, PredictionKey};
pub use input::{ArrayInput, FeatureTensor, InputBatch, InputFn, RepeatInput, SparseTensor};
pub use model::LinearModel;
pub use optimizer::{Adagrad, Ftrl, Optimizer, OptimizerSpec, SdcaOptimizer, Sgd};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_types_work() {
        let vec = Vector::zeros(5);
        let mat = Matrix::zeros((3, 4));
        assert_eq!(vec.len(), 5);
        assert_eq!(mat.shape(), &[3, 4]);
    }
}
