//! Model heads: how logits become losses, gradients, predictions and metrics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::metrics::{
    streaming_accuracy, streaming_auc, streaming_precision, streaming_recall, weighted_mean,
};
use crate::{EstimatorError, Matrix, Result, Vector};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    BinaryLogistic,
    Multiclass { n_classes: usize },
    Regression,
}

/// Named outputs a metric can be computed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PredictionKey {
    Classes,
    Probabilities,
    Logits,
    Scores,
}

impl PredictionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKey::Classes => "classes",
            PredictionKey::Probabilities => "probabilities",
            PredictionKey::Logits => "logits",
            PredictionKey::Scores => "scores",
        }
    }
}

impl fmt::Display for PredictionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "classes" => Ok(PredictionKey::Classes),
            "probabilities" => Ok(PredictionKey::Probabilities),
            "logits" => Ok(PredictionKey::Logits),
            "scores" => Ok(PredictionKey::Scores),
            other => Err(other.to_string()),
        }
    }
}

/// Head outputs for a batch of logits.
#[derive(Clone, Debug, PartialEq)]
pub struct Predictions {
    pub logits: Matrix,
    pub probabilities: Option<Matrix>,
    pub classes: Option<Vector>,
    pub scores: Option<Vector>,
}

impl Predictions {
    /// The output stored under `key` as an `n x k` matrix.
    pub fn get(&self, key: PredictionKey) -> Option<Matrix> {
        let column = |v: &Vector| v.clone().insert_axis(Axis(1));
        match key {
            PredictionKey::Logits => Some(self.logits.clone()),
            PredictionKey::Probabilities => self.probabilities.clone(),
            PredictionKey::Classes => self.classes.as_ref().map(column),
            PredictionKey::Scores => self.scores.as_ref().map(column),
        }
    }

    pub fn n_examples(&self) -> usize {
        self.logits.nrows()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softmax(logits: ArrayView1<f64>) -> Vector {
    let max = logits.fold(f64::NEG_INFINITY, |m, &z| m.max(z));
    let exp = logits.mapv(|z| (z - max).exp());
    let total = exp.sum();
    exp / total
}

fn argmax(values: ArrayView1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
        .0
}

impl Head {
    pub fn n_outputs(&self) -> usize {
        match self {
            Head::Multiclass { n_classes } => *n_classes,
            _ => 1,
        }
    }

    pub fn prediction_keys(&self) -> &'static [PredictionKey] {
        match self {
            Head::Regression => &[PredictionKey::Scores],
            _ => &[
                PredictionKey::Classes,
                PredictionKey::Probabilities,
                PredictionKey::Logits,
            ],
        }
    }

    pub fn default_prediction_key(&self) -> PredictionKey {
        match self {
            Head::Regression => PredictionKey::Scores,
            _ => PredictionKey::Classes,
        }
    }

    pub fn validate_labels(&self, labels: ArrayView1<f64>) -> Result<()> {
        for (row, &label) in labels.iter().enumerate() {
            let reason = match self {
                _ if !label.is_finite() => Some("label must be finite"),
                Head::BinaryLogistic if !(0.0..=1.0).contains(&label) => {
                    Some("binary labels must lie in [0, 1]")
                }
                Head::Multiclass { n_classes }
                    if label.fract() != 0.0 || label < 0.0 || label >= *n_classes as f64 =>
                {
                    Some("class ids must be integers in [0, n_classes)")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(EstimatorError::InvalidLabel { row, label, reason });
            }
        }
        Ok(())
    }

    /// Per-example unweighted loss.
    pub fn losses(&self, logits: &Matrix, labels: ArrayView1<f64>) -> Vector {
        match self {
            Head::BinaryLogistic => Array1::from_iter(logits.column(0).iter().zip(labels.iter()).map(
                |(&z, &y)| z.max(0.0) - z * y + (-z.abs()).exp().ln_1p(),
            )),
            Head::Multiclass { .. } => Array1::from_iter(logits.rows().into_iter().zip(labels.iter()).map(
                |(row, &y)| {
                    let p = softmax(row)[y as usize];
                    -p.max(f64::MIN_POSITIVE).ln()
                },
            )),
            Head::Regression => {
                let diff = &logits.column(0) - &labels;
                diff.mapv(|d| d * d)
            }
        }
    }

    /// Derivative of each example's loss with respect to its logits.
    pub fn gradients(&self, logits: &Matrix, labels: ArrayView1<f64>) -> Matrix {
        let mut gradients = Matrix::zeros(logits.raw_dim());
        for (i, (row, &y)) in logits.rows().into_iter().zip(labels.iter()).enumerate() {
            match self {
                Head::BinaryLogistic => gradients[[i, 0]] = sigmoid(row[0]) - y,
                Head::Multiclass { .. } => {
                    let mut g = softmax(row);
                    g[y as usize] -= 1.0;
                    gradients.row_mut(i).assign(&g);
                }
                Head::Regression => gradients[[i, 0]] = 2.0 * (row[0] - y),
            }
        }
        gradients
    }

    pub fn predictions(&self, logits: Matrix) -> Predictions {
        match self {
            Head::BinaryLogistic => {
                let positive = logits.column(0).mapv(sigmoid);
                let mut probabilities = Matrix::zeros((logits.nrows(), 2));
                probabilities.column_mut(0).assign(&positive.mapv(|p| 1.0 - p));
                probabilities.column_mut(1).assign(&positive);
                let classes = logits.column(0).mapv(|z| if z > 0.0 { 1.0 } else { 0.0 });
                Predictions {
                    logits,
                    probabilities: Some(probabilities),
                    classes: Some(classes),
                    scores: None,
                }
            }
            Head::Multiclass { .. } => {
                let mut probabilities = Matrix::zeros(logits.raw_dim());
                for (i, row) in logits.rows().into_iter().enumerate() {
                    probabilities.row_mut(i).assign(&softmax(row));
                }
                let classes = Array1::from_iter(logits.rows().into_iter().map(|r| argmax(r) as f64));
                Predictions {
                    logits,
                    probabilities: Some(probabilities),
                    classes: Some(classes),
                    scores: None,
                }
            }
            Head::Regression => {
                let scores = logits.column(0).to_owned();
                Predictions {
                    logits,
                    probabilities: None,
                    classes: None,
                    scores: Some(scores),
                }
            }
        }
    }

    /// Built-in evaluation metrics, all weighted by `weights`.
    pub fn default_metrics(
        &self,
        predictions: &Predictions,
        labels: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let losses = self.losses(&predictions.logits, labels);
        metrics.insert("loss".to_string(), weighted_mean(losses.view(), weights));

        let classes = predictions.get(PredictionKey::Classes);
        if let Some(classes) = &classes {
            metrics.insert(
                "accuracy".to_string(),
                streaming_accuracy(classes.view(), labels, weights),
            );
        }

        if let (Head::BinaryLogistic, Some(classes), Some(probabilities)) =
            (self, &classes, &predictions.probabilities)
        {
            let label_mean = weighted_mean(labels, weights);
            metrics.insert(
                "auc".to_string(),
                streaming_auc(probabilities.view(), labels, weights),
            );
            metrics.insert(
                "labels/prediction_mean".to_string(),
                weighted_mean(probabilities.column(1), weights),
            );
            metrics.insert("labels/actual_label_mean".to_string(), label_mean);
            metrics.insert("accuracy/baseline_label_mean".to_string(), label_mean);
            metrics.insert(
                "precision/positive_threshold_0.500000_mean".to_string(),
                streaming_precision(classes.view(), labels, weights),
            );
            metrics.insert(
                "recall/positive_threshold_0.500000_mean".to_string(),
                streaming_recall(classes.view(), labels, weights),
            );
        }
        metrics
    }
}
