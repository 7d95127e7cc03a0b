//! The linear model: one weight variable per feature column plus biases.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::feature_column::{FeatureColumn, SparseRows};
use crate::partition::PartitionedVariable;
use crate::{EstimatorError, InputBatch, Matrix, Result, RunConfig, Vector};

pub const BIAS_NAME: &str = "linear/bias_weight";
pub const CENTERED_BIAS_NAME: &str = "centered_bias_weight";
pub const JOINT_WEIGHTS_NAME: &str = "linear/joint_weights";

/// Variable name for a column's weights; the unnamed column maps to `linear/weight`.
pub fn weight_name(column: &str) -> String {
    if column.is_empty() {
        "linear/weight".to_string()
    } else {
        format!("linear/{}/weight", column)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: PartitionedVariable,
}

/// Where a column's rows live: which variable, starting at which row.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct ColumnSlot {
    variable: usize,
    offset: usize,
}

/// Activations of one column, already mapped into its variable's rows.
#[derive(Clone, Debug)]
pub struct ColumnActivations {
    pub variable: usize,
    pub rows: SparseRows,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    columns: Vec<FeatureColumn>,
    variables: Vec<Variable>,
    slots: Vec<ColumnSlot>,
    bias: Vector,
    centered_bias: Option<Vector>,
    n_outputs: usize,
}

impl LinearModel {
    pub fn new(
        columns: Vec<FeatureColumn>,
        n_outputs: usize,
        joint_weights: bool,
        centered_bias: bool,
        config: &RunConfig,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(EstimatorError::InvalidConfig(
                "at least one feature column is required".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(EstimatorError::InvalidConfig(format!(
                    "duplicate feature column `{}`",
                    column.name()
                )));
            }
        }

        let partitioned = |rows: usize| {
            PartitionedVariable::new(rows, n_outputs, config.num_ps_replicas, config.min_slice_size)
        };

        let (variables, slots) = if joint_weights {
            if let Some(column) = columns.iter().find(|c| !c.is_categorical()) {
                return Err(EstimatorError::InvalidConfig(format!(
                    "joint weights only support categorical columns, `{}` is real-valued",
                    column.name()
                )));
            }
            let mut slots = Vec::with_capacity(columns.len());
            let mut offset = 0;
            for column in &columns {
                slots.push(ColumnSlot { variable: 0, offset });
                offset += column.dimension();
            }
            let joint = Variable {
                name: JOINT_WEIGHTS_NAME.to_string(),
                value: partitioned(offset),
            };
            (vec![joint], slots)
        } else {
            let variables = columns
                .iter()
                .map(|c| Variable {
                    name: weight_name(&c.name()),
                    value: partitioned(c.dimension()),
                })
                .collect();
            let slots = (0..columns.len())
                .map(|variable| ColumnSlot { variable, offset: 0 })
                .collect();
            (variables, slots)
        };

        Ok(Self {
            columns,
            variables,
            slots,
            bias: Vector::zeros(n_outputs),
            centered_bias: centered_bias.then(|| Vector::zeros(n_outputs)),
            n_outputs,
        })
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn has_centered_bias(&self) -> bool {
        self.centered_bias.is_some()
    }

    /// Transforms every column of `batch` into rows of its variable.
    pub fn activations(&self, batch: &InputBatch) -> Result<Vec<ColumnActivations>> {
        self.columns
            .iter()
            .zip(&self.slots)
            .map(|(column, slot)| {
                Ok(ColumnActivations {
                    variable: slot.variable,
                    rows: column.transform(batch)?.offset(slot.offset),
                })
            })
            .collect()
    }

    /// `n x n_outputs` logits, including the bias and the centered bias.
    pub fn logits(&self, activations: &[ColumnActivations], n_examples: usize) -> Matrix {
        let mut logits = Matrix::zeros((n_examples, self.n_outputs));
        let mut intercept = self.bias.clone();
        if let Some(centered) = &self.centered_bias {
            intercept += centered;
        }
        for mut row in logits.rows_mut() {
            row.assign(&intercept);
        }

        for activation in activations {
            let variable = &self.variables[activation.variable].value;
            for (example, features) in activation.rows.iter().enumerate() {
                for &(id, value) in features {
                    if let Some(weights) = variable.row(id) {
                        for (k, w) in weights.iter().enumerate() {
                            logits[[example, k]] += value * w;
                        }
                    }
                }
            }
        }
        logits
    }

    pub fn logits_for(&self, batch: &InputBatch) -> Result<Matrix> {
        let activations = self.activations(batch)?;
        Ok(self.logits(&activations, batch.n_examples()))
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.iter().map(|v| v.name.clone()).collect();
        names.push(BIAS_NAME.to_string());
        if self.centered_bias.is_some() {
            names.push(CENTERED_BIAS_NAME.to_string());
        }
        names
    }

    /// A variable's current value; biases come back as `1 x n_outputs`.
    pub fn variable_value(&self, name: &str) -> Result<Matrix> {
        let as_row = |v: &Vector| v.clone().insert_axis(ndarray::Axis(0));
        match name {
            BIAS_NAME => Ok(as_row(&self.bias)),
            CENTERED_BIAS_NAME => self
                .centered_bias
                .as_ref()
                .map(as_row)
                .ok_or_else(|| EstimatorError::UnknownVariable(name.to_string())),
            _ => self
                .variables
                .iter()
                .find(|v| v.name == name)
                .map(|v| v.value.to_dense())
                .ok_or_else(|| EstimatorError::UnknownVariable(name.to_string())),
        }
    }

    /// Dense weight matrices of every column variable, keyed by variable name.
    pub fn weights(&self) -> BTreeMap<String, Matrix> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.value.to_dense()))
            .collect()
    }

    /// The effective intercept: bias plus centered bias.
    pub fn bias(&self) -> Vector {
        match &self.centered_bias {
            Some(centered) => &self.bias + centered,
            None => self.bias.clone(),
        }
    }

    pub(crate) fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub(crate) fn variable_mut(&mut self, index: usize) -> &mut Variable {
        &mut self.variables[index]
    }

    pub(crate) fn bias_mut(&mut self) -> &mut Vector {
        &mut self.bias
    }

    pub(crate) fn centered_bias_mut(&mut self) -> Option<&mut Vector> {
        self.centered_bias.as_mut()
    }
}
