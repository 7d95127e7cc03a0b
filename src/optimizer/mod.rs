//! Optimizers for the linear model's weight rows.
//!
//! Gradient optimizers ([`Ftrl`], [`Adagrad`], [`Sgd`]) update one weight row
//! at a time from its accumulated gradient and keep their per-row state in a
//! [`SlotStore`]. [`SdcaOptimizer`] instead runs dual coordinate ascent over
//! examples and is driven directly by the estimator.

mod adagrad;
mod ftrl;
mod sdca;
mod sgd;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{EstimatorError, Result};

pub use adagrad::Adagrad;
pub use ftrl::Ftrl;
pub use sdca::SdcaOptimizer;
pub(crate) use sdca::{SdcaLoss, SdcaState};
pub use sgd::Sgd;

/// Identifies one weight row of one variable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotKey {
    pub variable: String,
    pub row: usize,
}

impl SlotKey {
    pub fn new(variable: impl Into<String>, row: usize) -> Self {
        Self {
            variable: variable.into(),
            row,
        }
    }
}

/// Per-row optimizer state, keyed by `<variable>/<slot>` then row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotStore {
    slots: BTreeMap<String, BTreeMap<usize, Vec<f64>>>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot row for `key`, created with `init` in every entry on first use.
    pub fn row_mut(&mut self, key: &SlotKey, slot: &str, width: usize, init: f64) -> &mut [f64] {
        self.slots
            .entry(format!("{}/{}", key.variable, slot))
            .or_default()
            .entry(key.row)
            .or_insert_with(|| vec![init; width])
    }

    pub fn row(&self, key: &SlotKey, slot: &str) -> Option<&[f64]> {
        self.slots
            .get(&format!("{}/{}", key.variable, slot))?
            .get(&key.row)
            .map(Vec::as_slice)
    }

    /// Number of stored slot rows.
    pub fn len(&self) -> usize {
        self.slots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A per-row first-order optimizer.
pub trait Optimizer: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Updates `param` in place from its gradient `grad`.
    fn apply(&self, key: &SlotKey, param: &mut [f64], grad: &[f64], slots: &mut SlotStore);
}

/// Learning rate used by the default and the named optimizers.
pub fn default_learning_rate(n_columns: usize) -> f64 {
    (1.0 / (n_columns.max(1) as f64).sqrt()).min(0.2)
}

type OptimizerFactory = Arc<dyn Fn() -> Arc<dyn Optimizer> + Send + Sync>;

/// How an estimator chooses its optimizer.
#[derive(Clone, Default)]
pub enum OptimizerSpec {
    /// FTRL with [`default_learning_rate`].
    #[default]
    Default,
    /// `"Ftrl"`, `"Adagrad"` or `"SGD"` with [`default_learning_rate`].
    Named(String),
    Instance(Arc<dyn Optimizer>),
    /// Called once when the estimator starts training.
    Factory(OptimizerFactory),
    Sdca(SdcaOptimizer),
}

impl OptimizerSpec {
    pub fn from_fn<F, O>(factory: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: Optimizer + 'static,
    {
        OptimizerSpec::Factory(Arc::new(move || Arc::new(factory()) as Arc<dyn Optimizer>))
    }

    pub fn is_sdca(&self) -> bool {
        matches!(self, OptimizerSpec::Sdca(_))
    }

    pub(crate) fn resolve(&self, n_columns: usize) -> Result<ResolvedOptimizer> {
        let learning_rate = default_learning_rate(n_columns);
        let optimizer: Arc<dyn Optimizer> = match self {
            OptimizerSpec::Default => Arc::new(Ftrl::new(learning_rate)),
            OptimizerSpec::Named(name) => match name.as_str() {
                "Ftrl" => Arc::new(Ftrl::new(learning_rate)),
                "Adagrad" => Arc::new(Adagrad::new(learning_rate)),
                "SGD" => Arc::new(Sgd::new(learning_rate)),
                other => return Err(EstimatorError::UnknownOptimizer(other.to_string())),
            },
            OptimizerSpec::Instance(optimizer) => Arc::clone(optimizer),
            OptimizerSpec::Factory(factory) => (factory.as_ref())(),
            OptimizerSpec::Sdca(sdca) => return Ok(ResolvedOptimizer::Sdca(sdca.clone())),
        };
        Ok(ResolvedOptimizer::Gradient(optimizer))
    }
}

impl fmt::Debug for OptimizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerSpec::Default => f.write_str("Default"),
            OptimizerSpec::Named(name) => f.debug_tuple("Named").field(name).finish(),
            OptimizerSpec::Instance(optimizer) => f.debug_tuple("Instance").field(optimizer).finish(),
            OptimizerSpec::Factory(_) => f.write_str("Factory(..)"),
            OptimizerSpec::Sdca(sdca) => f.debug_tuple("Sdca").field(sdca).finish(),
        }
    }
}

impl From<&str> for OptimizerSpec {
    fn from(name: &str) -> Self {
        OptimizerSpec::Named(name.to_string())
    }
}

impl From<String> for OptimizerSpec {
    fn from(name: String) -> Self {
        OptimizerSpec::Named(name)
    }
}

impl From<Ftrl> for OptimizerSpec {
    fn from(optimizer: Ftrl) -> Self {
        OptimizerSpec::Instance(Arc::new(optimizer))
    }
}

impl From<Adagrad> for OptimizerSpec {
    fn from(optimizer: Adagrad) -> Self {
        OptimizerSpec::Instance(Arc::new(optimizer))
    }
}

impl From<Sgd> for OptimizerSpec {
    fn from(optimizer: Sgd) -> Self {
        OptimizerSpec::Instance(Arc::new(optimizer))
    }
}

impl From<SdcaOptimizer> for OptimizerSpec {
    fn from(optimizer: SdcaOptimizer) -> Self {
        OptimizerSpec::Sdca(optimizer)
    }
}

pub(crate) enum ResolvedOptimizer {
    Gradient(Arc<dyn Optimizer>),
    Sdca(SdcaOptimizer),
}
