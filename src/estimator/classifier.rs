use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{Estimator, LinearEstimator, Metrics, PredictIter};
use crate::feature_column::FeatureColumn;
use crate::head::{Head, Predictions};
use crate::input::{InputBatch, InputFn};
use crate::optimizer::OptimizerSpec;
use crate::{EstimatorError, Matrix, Result, RunConfig, Vector};

/// Linear classifier over feature columns.
///
/// Two classes use a single logit with sigmoid cross entropy; more classes use
/// one logit per class with softmax cross entropy. Labels are class ids.
#[derive(Clone, Debug)]
pub struct LinearClassifier {
    inner: LinearEstimator,
}

impl LinearClassifier {
    pub fn new(feature_columns: Vec<FeatureColumn>) -> Self {
        Self {
            inner: LinearEstimator::new(Head::BinaryLogistic, feature_columns),
        }
    }

    pub fn n_classes(mut self, n_classes: usize) -> Self {
        if n_classes < 2 {
            panic!("n_classes must be >= 2, got {}", n_classes);
        }
        self.inner.set_head(if n_classes == 2 {
            Head::BinaryLogistic
        } else {
            Head::Multiclass { n_classes }
        });
        self
    }

    /// An optimizer instance, a name (`"Ftrl"`, `"Adagrad"`, `"SGD"`), a
    /// factory from [`OptimizerSpec::from_fn`], or an SDCA optimizer.
    pub fn optimizer(mut self, optimizer: impl Into<OptimizerSpec>) -> Self {
        self.inner.set_optimizer(optimizer.into());
        self
    }

    /// Dense `[n, 1]` feature holding per-example loss weights.
    pub fn weight_column_name(mut self, name: impl Into<String>) -> Self {
        self.inner.set_weight_column(name.into());
        self
    }

    pub fn enable_centered_bias(mut self, enabled: bool) -> Self {
        self.inner.set_centered_bias(enabled);
        self
    }

    /// Store all (categorical) columns in one `linear/joint_weights` variable.
    pub fn joint_weights(mut self, enabled: bool) -> Self {
        self.inner.set_joint_weights(enabled);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.inner.set_config(config);
        self
    }

    /// Directory for checkpoints; an existing checkpoint there is restored.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.set_model_dir(dir.into());
        self
    }

    pub fn head(&self) -> Head {
        self.inner.head()
    }

    /// Trains on shuffled mini-batches of `x` (feature `""`) and `y`.
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

    /// Head outputs (classes, probabilities, logits) for one batch.
    pub fn predict_outputs(&self, batch: &InputBatch) -> Result<Predictions> {
        self.inner.predict(batch)
    }

    /// `n x n_classes` class probabilities.
    pub fn predict_proba(&self, batch: &InputBatch) -> Result<Matrix> {
        self.inner
            .predict(batch)?
            .probabilities
            .ok_or_else(|| EstimatorError::Unsupported("probabilities".to_string()))
    }

    /// Predicted class per example, batch after batch until `input` ends.
    pub fn predict_iter<'a, I: InputFn + ?Sized>(&'a self, input: &'a mut I) -> PredictIter<'a, I, f64> {
        self.inner.predict_iter(input, |p| {
            p.classes.as_ref().map(|c| c.to_vec()).unwrap_or_default()
        })
    }

    /// Class probabilities per example, batch after batch until `input` ends.
    pub fn predict_proba_iter<'a, I: InputFn + ?Sized>(
        &'a self,
        input: &'a mut I,
    ) -> PredictIter<'a, I, Vector> {
        self.inner.predict_iter(input, |p| {
            p.probabilities
                .as_ref()
                .map(|m| m.rows().into_iter().map(|r| r.to_owned()).collect())
                .unwrap_or_default()
        })
    }

    pub fn variable_names(&self) -> Result<Vec<String>> {
        self.inner.variable_names()
    }

    pub fn variable_value(&self, name: &str) -> Result<Matrix> {
        self.inner.variable_value(name)
    }

    /// Weights of every column variable, `dimension x logits` each.
    pub fn weights(&self) -> Result<BTreeMap<String, Matrix>> {
        self.inner.weights()
    }

    /// Bias per logit, including the centered bias.
    pub fn bias(&self) -> Result<Vector> {
        self.inner.bias()
    }
}

impl Estimator for LinearClassifier {
    fn predict(&self, batch: &InputBatch) -> Result<Vector> {
        self.inner
            .predict(batch)?
            .classes
            .ok_or_else(|| EstimatorError::Unsupported("classes".to_string()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::real_valued_column;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_n_classes_selects_head() {
        let classifier = LinearClassifier::new(vec![real_valued_column("x", 1)]).n_classes(3);
        assert_eq!(classifier.head(), Head::Multiclass { n_classes: 3 });
        assert_eq!(classifier.head().n_outputs(), 3);
    }

    #[test]
    fn test_predict_before_fit() {
        let classifier = LinearClassifier::new(vec![real_valued_column("x", 1)]);
        let batch = InputBatch::new().with_column("x", &[1.0]);
        assert!(matches!(classifier.predict(&batch), Err(EstimatorError::NotFitted)));
        assert_eq!(classifier.global_step().unwrap(), 0);
    }

    #[test]
    fn test_centered_bias_learns_the_unweighted_label_prior() {
        let batch = InputBatch::new()
            .with_column("x", &[1.0; 4])
            .with_column("w", &[100.0, 1.0, 1.0, 1.0])
            .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
        let mut classifier =
            LinearClassifier::new(vec![real_valued_column("x", 1)]).weight_column_name("w");
        classifier.fit(&mut batch.repeat(), 1000).unwrap();

        let centered = classifier.variable_value("centered_bias_weight").unwrap();
        assert_abs_diff_eq!(centered[[0, 0]], (1.0f64 / 3.0).ln(), epsilon = 1e-3);
    }

    #[test]
    fn test_predict_outputs() {
        let batch = InputBatch::new()
            .with_column("x", &[1.0, -1.0])
            .with_label_values(&[1.0, 0.0]);
        let mut classifier = LinearClassifier::new(vec![real_valued_column("x", 1)]).n_classes(3);
        classifier.fit(&mut batch.clone().repeat(), 20).unwrap();

        let outputs = classifier.predict_outputs(&batch).unwrap();
        assert_eq!(outputs.logits.shape(), &[2, 3]);
        let probabilities = outputs.probabilities.unwrap();
        for row in probabilities.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(outputs.classes.unwrap(), classifier.predict(&batch).unwrap());
        assert!(outputs.scores.is_none());
    }

    #[test]
    fn test_invalid_n_classes() {
        std::panic::catch_unwind(|| {
            LinearClassifier::new(vec![real_valued_column("x", 1)]).n_classes(1);
        })
        .expect_err("Should panic on n_classes < 2");
    }
}
