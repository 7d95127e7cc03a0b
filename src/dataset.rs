//! Small in-memory datasets: embedded iris and synthetic linear regression data.

use ndarray::{s, Array1, Array2, Axis};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{EstimatorError, InputBatch, Matrix, Result, Vector};

const IRIS_CSV: &str = include_str!("../data/iris.csv");

#[derive(Clone, Debug)]
pub struct Dataset {
    pub features: Matrix,
    pub labels: Vector,
}

impl Dataset {
    pub fn new(features: Matrix, labels: Vector) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(EstimatorError::ShapeMismatch {
                name: "labels".to_string(),
                expected: format!("{} rows", features.nrows()),
                actual: format!("{} rows", labels.len()),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Rows whose label satisfies `keep`.
    pub fn filter_labels(&self, keep: impl Fn(f64) -> bool) -> Self {
        let rows: Vec<usize> = (0..self.n_samples()).filter(|&i| keep(self.labels[i])).collect();
        Self {
            features: self.features.select(Axis(0), &rows),
            labels: self.labels.select(Axis(0), &rows),
        }
    }

    /// Splits off the last `test_size` fraction of rows.
    pub fn train_test_split(&self, test_size: f64) -> Result<(Self, Self)> {
        if test_size <= 0.0 || test_size >= 1.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "test_size must be between 0 and 1, got {}",
                test_size
            )));
        }
        let n_test = (self.n_samples() as f64 * test_size).round() as usize;
        let n_train = self.n_samples() - n_test;

        let train = Dataset::new(
            self.features.slice(s![..n_train, ..]).to_owned(),
            self.labels.slice(s![..n_train]).to_owned(),
        )?;
        let test = Dataset::new(
            self.features.slice(s![n_train.., ..]).to_owned(),
            self.labels.slice(s![n_train..]).to_owned(),
        )?;
        Ok((train, test))
    }

    /// All rows as one batch: features under `""`, matching
    /// [`infer_real_valued_columns_from_input`](crate::infer_real_valued_columns_from_input).
    pub fn to_input(&self) -> InputBatch {
        self.to_named_input("")
    }

    pub fn to_named_input(&self, feature: &str) -> InputBatch {
        InputBatch::new()
            .with_dense(feature, self.features.clone())
            .with_labels(self.labels.clone().insert_axis(Axis(1)))
    }
}

/// The 150-example iris dataset with class ids 0, 1, 2.
pub fn load_iris() -> Result<Dataset> {
    let mut features = Vec::with_capacity(150 * 4);
    let mut labels = Vec::with_capacity(150);
    for (line_no, line) in IRIS_CSV.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let values = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EstimatorError::Dataset(format!("iris.csv line {}: {}", line_no + 1, e)))?;
        if values.len() != 5 {
            return Err(EstimatorError::Dataset(format!(
                "iris.csv line {}: expected 5 fields, got {}",
                line_no + 1,
                values.len()
            )));
        }
        features.extend_from_slice(&values[..4]);
        labels.push(values[4]);
    }
    let features = Array2::from_shape_vec((labels.len(), 4), features)
        .map_err(|e| EstimatorError::Dataset(e.to_string()))?;
    Dataset::new(features, Array1::from(labels))
}

/// The first two iris classes (100 examples).
pub fn load_iris_binary() -> Result<Dataset> {
    Ok(load_iris()?.filter_labels(|label| label < 2.0))
}

/// `y = x . weights + bias + noise * N(0, 1)` with `x ~ U(-1, 1)`.
pub fn make_regression(
    n_samples: usize,
    weights: &[f64],
    bias: f64,
    noise: f64,
    seed: u64,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = Array2::random_using((n_samples, weights.len()), Uniform::new(-1.0, 1.0), &mut rng);
    let noise = Array1::<f64>::random_using(n_samples, StandardNormal, &mut rng) * noise;
    let labels = features.dot(&Array1::from(weights.to_vec())) + bias + noise;
    Dataset { features, labels }
}

/// Weights drawn from `scale * N(0, 1)`, for use with [`make_regression`].
pub fn random_weights(n: usize, scale: f64, seed: u64) -> Vector {
    let mut rng = StdRng::seed_from_u64(seed);
    Array1::<f64>::random_using(n, StandardNormal, &mut rng) * scale
}
