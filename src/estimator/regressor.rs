use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{Estimator, LinearEstimator, Metrics, PredictIter};
use crate::feature_column::FeatureColumn;
use crate::head::Head;
use crate::input::{InputBatch, InputFn};
use crate::optimizer::OptimizerSpec;
use crate::{EstimatorError, Matrix, Result, RunConfig, Vector};

/// Linear regressor over feature columns, trained on squared error.
#[derive(Clone, Debug)]
pub struct LinearRegressor {
    inner: LinearEstimator,
}

impl LinearRegressor {
    pub fn new(feature_columns: Vec<FeatureColumn>) -> Self {
        Self {
            inner: LinearEstimator::new(Head::Regression, feature_columns),
        }
    }

    pub fn optimizer(mut self, optimizer: impl Into<OptimizerSpec>) -> Self {
        self.inner.set_optimizer(optimizer.into());
        self
    }

    pub fn weight_column_name(mut self, name: impl Into<String>) -> Self {
        self.inner.set_weight_column(name.into());
        self
    }

    pub fn enable_centered_bias(mut self, enabled: bool) -> Self {
        self.inner.set_centered_bias(enabled);
        self
    }

    pub fn joint_weights(mut self, enabled: bool) -> Self {
        self.inner.set_joint_weights(enabled);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.inner.set_config(config);
        self
    }

    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.set_model_dir(dir.into());
        self
    }

    pub fn fit_arrays(
        &mut self,
        x: &Matrix,
        y: &Vector,
        batch_size: usize,
        steps: usize,
    ) -> Result<&mut Self> {
        self.inner.fit_arrays(x, y, batch_size, steps)?;
        Ok(self)
    }

    pub fn predict_iter<'a, I: InputFn + ?Sized>(&'a self, input: &'a mut I) -> PredictIter<'a, I, f64> {
        self.inner.predict_iter(input, |p| {
            p.scores.as_ref().map(|s| s.to_vec()).unwrap_or_default()
        })
    }

    pub fn variable_names(&self) -> Result<Vec<String>> {
        self.inner.variable_names()
    }

    pub fn variable_value(&self, name: &str) -> Result<Matrix> {
        self.inner.variable_value(name)
    }

    pub fn weights(&self) -> Result<BTreeMap<String, Matrix>> {
        self.inner.weights()
    }

    pub fn bias(&self) -> Result<Vector> {
        self.inner.bias()
    }
}

impl Estimator for LinearRegressor {
    fn predict(&self, batch: &InputBatch) -> Result<Vector> {
        self.inner
            .predict(batch)?
            .scores
            .ok_or_else(|| EstimatorError::Unsupported("scores".to_string()))
    }

    fn fit<I: InputFn + ?Sized>(&mut self, input: &mut I, steps: usize) -> Result<&mut Self> {
        self.inner.fit(input, steps)?;
        Ok(self)
    }

    fn evaluate<I: InputFn + ?Sized>(
        &self,
        input: &mut I,
        steps: Option<usize>,
        metrics: &Metrics,
    ) -> Result<BTreeMap<String, f64>> {
        self.inner.evaluate(input, steps, metrics)
    }

    fn export(&self, export_dir: impl AsRef<Path>) -> Result<PathBuf> {
        self.inner.export(export_dir.as_ref())
    }

    fn global_step(&self) -> Result<u64> {
        self.inner.global_step()
    }
}
