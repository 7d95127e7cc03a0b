//! Training, evaluation, prediction and export for linear models.
//!
//! [`LinearClassifier`] and [`LinearRegressor`] are thin fronts over one
//! shared core that owns the feature columns, the head, the optimizer choice
//! and, once trained or restored, the model with its optimizer state.

mod classifier;
mod metric_spec;
mod regressor;

use std::borrow::Cow;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use ndarray::{concatenate, Array1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::{self, ExportedModel, Signature};
use crate::feature_column::FeatureColumn;
use crate::head::{Head, Predictions};
use crate::input::{ArrayInput, InputBatch, InputFn};
use crate::model::{ColumnActivations, LinearModel, BIAS_NAME, CENTERED_BIAS_NAME};
use crate::optimizer::{
    Adagrad, Optimizer, OptimizerSpec, ResolvedOptimizer, SdcaLoss, SdcaOptimizer, SdcaState,
    SlotKey, SlotStore,
};
use crate::{EstimatorError, Matrix, Result, RunConfig, Vector};

pub use classifier::LinearClassifier;
pub use regressor::LinearRegressor;
pub use metric_spec::{MetricKey, MetricSpec, Metrics};

use metric_spec::resolve_metrics;

/// Learning rate of the centered bias's own Adagrad optimizer.
const CENTERED_BIAS_LEARNING_RATE: f64 = 0.1;

/// Salt for the shuffling seed drawn by [`LinearEstimator::fit_arrays`].
const ARRAY_SHUFFLE_SALT: u64 = 0x5eed;

/// The estimator API shared by classifiers and regressors.
pub trait Estimator {
    /// Predicted classes (classifiers) or scores (regressors) per example.
    fn predict(&self, batch: &InputBatch) -> Result<Vector>;

    /// Runs up to `steps` training steps, stopping early if `input` runs dry.
    fn fit<I: InputFn + ?Sized>(&mut self, input: &mut I, steps: usize) -> Result<&mut Self>;

    /// Computes the default metrics plus `metrics` over up to `steps` batches,
    /// or until `input` is exhausted when `steps` is `None`.
    fn evaluate<I: InputFn + ?Sized>(
        &self,
        input: &mut I,
        steps: Option<usize>,
        metrics: &Metrics,
    ) -> Result<BTreeMap<String, f64>>;

    /// Writes a serving bundle under `export_dir/<global_step>/`.
    fn export(&self, export_dir: impl AsRef<Path>) -> Result<PathBuf>;

    /// Training steps taken so far; 0 before the first `fit`. A checkpoint
    /// that exists but cannot be restored is an error.
    fn global_step(&self) -> Result<u64>;
}

/// Everything a checkpoint restores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct TrainingState {
    pub global_step: u64,
    pub model: LinearModel,
    pub slots: SlotStore,
    pub sdca: SdcaState,
}

#[derive(Clone, Debug)]
pub(crate) struct LinearEstimator {
    head: Head,
    columns: Vec<FeatureColumn>,
    optimizer: OptimizerSpec,
    weight_column: Option<String>,
    centered_bias: bool,
    joint_weights: bool,
    config: RunConfig,
    model_dir: Option<PathBuf>,
    state: Option<TrainingState>,
}

impl LinearEstimator {
    pub fn new(head: Head, columns: Vec<FeatureColumn>) -> Self {
        Self {
            head,
            columns,
            optimizer: OptimizerSpec::Default,
            weight_column: None,
            centered_bias: true,
            joint_weights: false,
            config: RunConfig::new(),
            model_dir: None,
            state: None,
        }
    }

    pub fn set_head(&mut self, head: Head) {
        self.head = head;
    }

    pub fn set_optimizer(&mut self, optimizer: OptimizerSpec) {
        self.optimizer = optimizer;
    }

    pub fn set_weight_column(&mut self, name: String) {
        self.weight_column = Some(name);
    }

    pub fn set_centered_bias(&mut self, enabled: bool) {
        self.centered_bias = enabled;
    }

    pub fn set_joint_weights(&mut self, enabled: bool) {
        self.joint_weights = enabled;
    }

    pub fn set_config(&mut self, config: RunConfig) {
        self.config = config;
    }

    pub fn set_model_dir(&mut self, dir: PathBuf) {
        self.model_dir = Some(dir);
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn head(&self) -> Head {
        self.head
    }

    fn signature(&self) -> Signature {
        Signature {
            head: self.head,
            columns: self.columns.clone(),
        }
    }

    fn new_state(&self) -> Result<TrainingState> {
        let model = LinearModel::new(
            self.columns.clone(),
            self.head.n_outputs(),
            self.joint_weights,
            self.centered_bias && !self.optimizer.is_sdca(),
            &self.config,
        )?;
        Ok(TrainingState {
            global_step: 0,
            model,
            slots: SlotStore::new(),
            sdca: SdcaState::default(),
        })
    }

    /// The trained state: in memory, else restored from `model_dir`.
    fn state(&self) -> Result<Cow<'_, TrainingState>> {
        if let Some(state) = &self.state {
            return Ok(Cow::Borrowed(state));
        }
        let dir = self.model_dir.as_deref().ok_or(EstimatorError::NotFitted)?;
        checkpoint::load(dir, &self.signature())?
            .map(Cow::Owned)
            .ok_or(EstimatorError::NotFitted)
    }

    fn take_state(&mut self) -> Result<TrainingState> {
        if let Some(state) = self.state.take() {
            return Ok(state);
        }
        if let Some(dir) = &self.model_dir {
            if let Some(state) = checkpoint::load(dir, &self.signature())? {
                return Ok(state);
            }
        }
        self.new_state()
    }

    fn example_weights(&self, batch: &InputBatch, n: usize) -> Result<Vector> {
        let Some(name) = &self.weight_column else {
            return Ok(Vector::ones(n));
        };
        let values = batch.dense(name)?;
        if values.ncols() != 1 {
            return Err(EstimatorError::ShapeMismatch {
                name: name.clone(),
                expected: format!("[{}, 1]", n),
                actual: format!("{:?}", values.shape()),
            });
        }
        Ok(values.column(0).to_owned())
    }

    pub fn fit<I: InputFn + ?Sized>(&mut self, input: &mut I, steps: usize) -> Result<()> {
        let optimizer = self.optimizer.resolve(self.columns.len())?;
        if let (ResolvedOptimizer::Sdca(_), Head::Multiclass { .. }) = (&optimizer, self.head) {
            return Err(EstimatorError::Unsupported(
                "SDCA supports binary classification and regression only".to_string(),
            ));
        }

        let mut state = self.take_state()?;
        let result = self.train(&mut state, &optimizer, input, steps);
        self.state = Some(state);
        result?;

        if let (Some(dir), Some(state)) = (&self.model_dir, &self.state) {
            checkpoint::save(dir, &self.signature(), state)?;
        }
        Ok(())
    }

    /// Trains on shuffled mini-batches of `x` (feature `""`) and `y`.
    pub fn fit_arrays(&mut self, x: &Matrix, y: &Vector, batch_size: usize, steps: usize) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(EstimatorError::ShapeMismatch {
                name: "y".to_string(),
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        let seed = self.config.rng(ARRAY_SHUFFLE_SALT).r#gen();
        let mut input = ArrayInput::new(x.clone(), Some(y.clone()))
            .batch_size(batch_size)
            .shuffle(seed);
        self.fit(&mut input, steps)
    }

    fn train<I: InputFn + ?Sized>(
        &self,
        state: &mut TrainingState,
        optimizer: &ResolvedOptimizer,
        input: &mut I,
        steps: usize,
    ) -> Result<()> {
        let start = state.global_step;
        let mut loss = f64::NAN;
        for _ in 0..steps {
            let Some(batch) = input.next_batch() else {
                warn!(
                    completed = state.global_step - start,
                    requested = steps,
                    "input exhausted before all training steps ran"
                );
                break;
            };
            loss = match optimizer {
                ResolvedOptimizer::Gradient(optimizer) => {
                    self.gradient_step(state, &batch, optimizer.as_ref())?
                }
                ResolvedOptimizer::Sdca(sdca) => self.sdca_step(state, &batch, sdca)?,
            };
            state.global_step += 1;
            if state.global_step % self.config.log_step_count_steps as u64 == 0 {
                debug!(global_step = state.global_step, loss, "training step");
            }
        }
        info!(
            global_step = state.global_step,
            steps = state.global_step - start,
            loss,
            "finished training"
        );
        Ok(())
    }

    /// Labels, weights and activations of a training or evaluation batch.
    fn prepare(
        &self,
        model: &LinearModel,
        batch: &InputBatch,
    ) -> Result<(Vector, Vector, Vec<ColumnActivations>)> {
        let n = batch.validate()?;
        let labels = batch.labels()?.to_owned();
        self.head.validate_labels(labels.view())?;
        let weights = self.example_weights(batch, n)?;
        let activations = model.activations(batch)?;
        Ok((labels, weights, activations))
    }

    /// One full-batch gradient step; returns the training loss before it.
    fn gradient_step(
        &self,
        state: &mut TrainingState,
        batch: &InputBatch,
        optimizer: &dyn Optimizer,
    ) -> Result<f64> {
        let (labels, weights, activations) = self.prepare(&state.model, batch)?;
        let n = labels.len();
        if n == 0 {
            return Ok(0.0);
        }
        let scale = &weights / n as f64;

        let logits = state.model.logits(&activations, n);
        let loss = self.head.losses(&logits, labels.view()).dot(&scale);
        let mut gradients = self.head.gradients(&logits, labels.view());
        gradients *= &scale.view().insert_axis(Axis(1));

        let n_outputs = state.model.n_outputs();
        let mut accumulated: BTreeMap<(usize, usize), Vec<f64>> = BTreeMap::new();
        for activation in &activations {
            for (example, features) in activation.rows.iter().enumerate() {
                for &(row, value) in features {
                    let grad = accumulated
                        .entry((activation.variable, row))
                        .or_insert_with(|| vec![0.0; n_outputs]);
                    for (g, d) in grad.iter_mut().zip(gradients.row(example)) {
                        *g += value * d;
                    }
                }
            }
        }

        for ((variable, row), grad) in accumulated {
            let key = SlotKey::new(state.model.variables()[variable].name.as_str(), row);
            let param = state.model.variable_mut(variable).value.row_mut(row);
            optimizer.apply(&key, param, &grad, &mut state.slots);
        }

        let bias_grad = gradients.sum_axis(Axis(0)).to_vec();
        let mut bias = state.model.bias_mut().to_vec();
        optimizer.apply(&SlotKey::new(BIAS_NAME, 0), &mut bias, &bias_grad, &mut state.slots);
        state.model.bias_mut().assign(&Array1::from(bias));

        // The centered bias fits the label prior alone: its loss uses the
        // centered bias as every example's logits, unweighted.
        if let Some(centered) = state.model.centered_bias_mut() {
            let prior = Matrix::from_shape_fn((n, n_outputs), |(_, k)| centered[k]);
            let prior_grad = self.head.gradients(&prior, labels.view()).sum_axis(Axis(0)) / n as f64;
            let mut values = centered.to_vec();
            Adagrad::new(CENTERED_BIAS_LEARNING_RATE).apply(
                &SlotKey::new(CENTERED_BIAS_NAME, 0),
                &mut values,
                &prior_grad.to_vec(),
                &mut state.slots,
            );
            centered.assign(&Array1::from(values));
        }
        Ok(loss)
    }

    /// One SDCA pass over the batch; returns the training loss after it.
    fn sdca_step(
        &self,
        state: &mut TrainingState,
        batch: &InputBatch,
        sdca: &SdcaOptimizer,
    ) -> Result<f64> {
        let loss = match self.head {
            Head::BinaryLogistic => SdcaLoss::Logistic,
            Head::Regression => SdcaLoss::Squared,
            Head::Multiclass { .. } => {
                return Err(EstimatorError::Unsupported(
                    "SDCA supports binary classification and regression only".to_string(),
                ));
            }
        };
        let (labels, weights, activations) = self.prepare(&state.model, batch)?;
        let example_ids = sdca.example_ids(batch)?;
        if example_ids.len() != labels.len() {
            return Err(EstimatorError::ShapeMismatch {
                name: sdca.example_id_column().to_string(),
                expected: format!("{} ids", labels.len()),
                actual: format!("{} ids", example_ids.len()),
            });
        }

        let mut rng = self.config.rng(state.global_step);
        sdca.run_pass(
            loss,
            &mut state.model,
            &activations,
            labels.view(),
            weights.view(),
            &example_ids,
            &mut state.slots,
            &mut state.sdca,
            &mut rng,
        )?;

        let n = labels.len().max(1) as f64;
        let logits = state.model.logits(&activations, labels.len());
        Ok(self.head.losses(&logits, labels.view()).dot(&weights) / n)
    }

    pub fn evaluate<I: InputFn + ?Sized>(
        &self,
        input: &mut I,
        steps: Option<usize>,
        metrics: &Metrics,
    ) -> Result<BTreeMap<String, f64>> {
        let custom = resolve_metrics(&self.head, metrics)?;
        let state = self.state()?;

        let (mut logits, mut labels, mut weights) = (Vec::new(), Vec::new(), Vec::new());
        while steps.is_none_or(|limit| logits.len() < limit) {
            let Some(batch) = input.next_batch() else {
                break;
            };
            let (batch_labels, batch_weights, activations) = self.prepare(&state.model, &batch)?;
            logits.push(state.model.logits(&activations, batch_labels.len()));
            labels.push(batch_labels);
            weights.push(batch_weights);
        }
        if logits.is_empty() {
            return Err(EstimatorError::EmptyInput);
        }

        let logits = concatenate(Axis(0), &logits.iter().map(|m| m.view()).collect::<Vec<_>>())
            .map_err(|e| EstimatorError::InvalidConfig(e.to_string()))?;
        let labels = Array1::from_iter(labels.into_iter().flatten());
        let weights = Array1::from_iter(weights.into_iter().flatten());
        let predictions = self.head.predictions(logits);

        let mut results = self
            .head
            .default_metrics(&predictions, labels.view(), weights.view());
        for metric in custom {
            let Some(values) = predictions.get(metric.key) else {
                return Err(EstimatorError::UnknownPredictionKey {
                    metric: metric.name,
                    key: metric.key.to_string(),
                });
            };
            let value = metric
                .spec
                .compute(values.view(), labels.view(), weights.view());
            results.insert(metric.name, value);
        }
        results.insert("global_step".to_string(), state.global_step as f64);

        info!(
            global_step = state.global_step,
            examples = labels.len(),
            loss = results.get("loss").copied().unwrap_or(f64::NAN),
            "finished evaluation"
        );
        Ok(results)
    }

    pub fn predict(&self, batch: &InputBatch) -> Result<Predictions> {
        predict_with(&self.head, &self.state()?.model, batch)
    }

    pub fn predict_iter<'a, I, T>(
        &'a self,
        input: &'a mut I,
        extract: fn(&Predictions) -> Vec<T>,
    ) -> PredictIter<'a, I, T>
    where
        I: InputFn + ?Sized,
    {
        PredictIter {
            estimator: self,
            state: None,
            input,
            extract,
            pending: VecDeque::new(),
            failed: false,
        }
    }

    pub fn export(&self, export_dir: &Path) -> Result<PathBuf> {
        let state = self.state()?;
        ExportedModel::new(self.head, state.model.clone(), state.global_step).save(export_dir)
    }

    pub fn global_step(&self) -> Result<u64> {
        match self.state() {
            Ok(state) => Ok(state.global_step),
            Err(EstimatorError::NotFitted) => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub fn variable_names(&self) -> Result<Vec<String>> {
        Ok(self.state()?.model.variable_names())
    }

    pub fn variable_value(&self, name: &str) -> Result<Matrix> {
        self.state()?.model.variable_value(name)
    }

    pub fn weights(&self) -> Result<BTreeMap<String, Matrix>> {
        Ok(self.state()?.model.weights())
    }

    pub fn bias(&self) -> Result<Vector> {
        Ok(self.state()?.model.bias())
    }
}

fn predict_with(head: &Head, model: &LinearModel, batch: &InputBatch) -> Result<Predictions> {
    batch.validate()?;
    Ok(head.predictions(model.logits_for(batch)?))
}

/// Lazily predicts batch after batch, yielding one item per example.
///
/// Stops after the input is exhausted or after the first error.
pub struct PredictIter<'a, I: ?Sized, T> {
    estimator: &'a LinearEstimator,
    state: Option<Cow<'a, TrainingState>>,
    input: &'a mut I,
    extract: fn(&Predictions) -> Vec<T>,
    pending: VecDeque<T>,
    failed: bool,
}

impl<I: InputFn + ?Sized, T> PredictIter<'_, I, T> {
    fn refill(&mut self) -> Result<bool> {
        if self.state.is_none() {
            self.state = Some(self.estimator.state()?);
        }
        let Some(state) = &self.state else {
            return Err(EstimatorError::NotFitted);
        };
        let Some(batch) = self.input.next_batch() else {
            return Ok(false);
        };
        let predictions = predict_with(&self.estimator.head, &state.model, &batch)?;
        self.pending.extend((self.extract)(&predictions));
        Ok(true)
    }
}

impl<I: InputFn + ?Sized, T> Iterator for PredictIter<'_, I, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            if self.failed {
                return None;
            }
            match self.refill() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
