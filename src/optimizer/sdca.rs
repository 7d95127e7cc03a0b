//! Stochastic dual coordinate ascent for binary logistic and squared loss.
//!
//! Minimizes `sum_i c_i * loss(w . x_i, y_i) + l2/2 |w|^2 + l1 |w|_1` where the
//! bias is an always-on feature. Each example owns a dual variable `alpha_i`,
//! keyed by its example id so it survives across batches and steps. The
//! unshrunk primal `v = (1/l2) sum_i c_i alpha_i x_i` is kept per weight row in
//! the slot store, and the weight itself is the soft-threshold of `v`.

use std::collections::BTreeMap;

use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{SlotKey, SlotStore};
use crate::input::{FeatureTensor, InputBatch};
use crate::model::{ColumnActivations, LinearModel, BIAS_NAME};
use crate::{EstimatorError, Result};

const PRIMAL_SLOT: &str = "SDCA/unshrunk";
const MAX_NEWTON_STEPS: usize = 50;
const NEWTON_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdcaOptimizer {
    example_id_column: String,
    symmetric_l1_regularization: f64,
    symmetric_l2_regularization: f64,
}

impl SdcaOptimizer {
    pub fn new(example_id_column: impl Into<String>) -> Self {
        Self {
            example_id_column: example_id_column.into(),
            symmetric_l1_regularization: 0.0,
            symmetric_l2_regularization: 1.0,
        }
    }

    pub fn symmetric_l1_regularization(mut self, l1: f64) -> Self {
        if l1 < 0.0 {
            panic!("symmetric_l1_regularization must be >= 0, got {}", l1);
        }
        self.symmetric_l1_regularization = l1;
        self
    }

    pub fn symmetric_l2_regularization(mut self, l2: f64) -> Self {
        if l2 <= 0.0 {
            panic!("symmetric_l2_regularization must be > 0, got {}", l2);
        }
        self.symmetric_l2_regularization = l2;
        self
    }

    pub fn example_id_column(&self) -> &str {
        &self.example_id_column
    }

    /// One id per example, read from the example-id feature.
    pub(crate) fn example_ids(&self, batch: &InputBatch) -> Result<Vec<String>> {
        match batch.feature(&self.example_id_column)? {
            FeatureTensor::Strings(ids) => Ok(ids.clone()),
            FeatureTensor::SparseStrings(tensor) => {
                let mut ids = vec![None; tensor.n_rows()];
                for ([row, _], id) in tensor.iter() {
                    ids[row].get_or_insert_with(|| id.clone());
                }
                ids.into_iter()
                    .enumerate()
                    .map(|(row, id)| {
                        id.ok_or_else(|| EstimatorError::ShapeMismatch {
                            name: self.example_id_column.clone(),
                            expected: "one id per example".to_string(),
                            actual: format!("no id for example {}", row),
                        })
                    })
                    .collect()
            }
            other => Err(EstimatorError::FeatureType {
                name: self.example_id_column.clone(),
                expected: "strings",
                actual: other.kind(),
            }),
        }
    }

    fn shrink(&self, v: f64) -> f64 {
        let threshold = self.symmetric_l1_regularization / self.symmetric_l2_regularization;
        v.signum() * (v.abs() - threshold).max(0.0)
    }

    /// One pass over the batch in random order, updating duals and weights.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn run_pass(
        &self,
        loss: SdcaLoss,
        model: &mut LinearModel,
        activations: &[ColumnActivations],
        labels: ArrayView1<f64>,
        weights: ArrayView1<f64>,
        example_ids: &[String],
        slots: &mut SlotStore,
        state: &mut SdcaState,
        rng: &mut StdRng,
    ) -> Result<()> {
        if loss == SdcaLoss::Logistic {
            if let Some((row, &label)) =
                labels.iter().enumerate().find(|(_, y)| **y != 0.0 && **y != 1.0)
            {
                return Err(EstimatorError::InvalidLabel {
                    row,
                    label,
                    reason: "SDCA logistic loss needs labels in {0, 1}",
                });
            }
        }

        let names: Vec<String> = model.variables().iter().map(|v| v.name.clone()).collect();
        let l2 = self.symmetric_l2_regularization;
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(rng);

        for example in order {
            let c = weights[example];
            if c <= 0.0 {
                continue;
            }
            let features: Vec<(usize, usize, f64)> = activations
                .iter()
                .flat_map(|a| a.rows.row(example).iter().map(|&(row, x)| (a.variable, row, x)))
                .collect();

            let mut wx = model.bias()[0];
            let mut squared_norm = 1.0;
            for &(variable, row, x) in &features {
                wx += x * model.variables()[variable].value.get(row, 0);
                squared_norm += x * x;
            }

            let id = &example_ids[example];
            let alpha = state.duals.get(id).copied().unwrap_or(0.0);
            let scale = c * squared_norm / l2;
            let delta = match loss {
                SdcaLoss::Squared => (labels[example] - wx - alpha) / (1.0 + scale),
                SdcaLoss::Logistic => {
                    let y = if labels[example] == 1.0 { 1.0 } else { -1.0 };
                    y * solve_logistic_dual(y, wx, alpha, scale) - alpha
                }
            };
            state.duals.insert(id.clone(), alpha + delta);

            let step = c * delta / l2;
            let bias_v = &mut slots.row_mut(&SlotKey::new(BIAS_NAME, 0), PRIMAL_SLOT, 1, 0.0)[0];
            *bias_v += step;
            model.bias_mut()[0] = self.shrink(*bias_v);

            for (variable, row, x) in features {
                let key = SlotKey::new(names[variable].as_str(), row);
                let v = &mut slots.row_mut(&key, PRIMAL_SLOT, 1, 0.0)[0];
                *v += step * x;
                model.variable_mut(variable).value.row_mut(row)[0] = self.shrink(*v);
            }
        }
        Ok(())
    }
}

/// Loss functions SDCA can optimize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SdcaLoss {
    Logistic,
    Squared,
}

/// Dual variables by example id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SdcaState {
    pub duals: BTreeMap<String, f64>,
}

/// Maximizes the logistic dual along one coordinate.
///
/// With `t = y * alpha'` in `(0, 1)`, the optimum solves
/// `ln(t / (1 - t)) + y * wx + scale * (t - y * alpha) = 0`; the left side is
/// increasing in `t`, so Newton steps are kept inside a shrinking bracket.
fn solve_logistic_dual(y: f64, wx: f64, alpha: f64, scale: f64) -> f64 {
    let y_alpha = y * alpha;
    let mut t = if y_alpha > 0.0 && y_alpha < 1.0 { y_alpha } else { 0.5 };
    let (mut lo, mut hi) = (0.0, 1.0);

    for _ in 0..MAX_NEWTON_STEPS {
        let f = (t / (1.0 - t)).ln() + y * wx + scale * (t - y_alpha);
        if f > 0.0 {
            hi = t;
        } else {
            lo = t;
        }
        let slope = 1.0 / (t * (1.0 - t)) + scale;
        let mut next = t - f / slope;
        if !(next > lo && next < hi) {
            next = (lo + hi) / 2.0;
        }
        if (next - t).abs() < NEWTON_TOLERANCE {
            return next;
        }
        t = next;
    }
    t
}
