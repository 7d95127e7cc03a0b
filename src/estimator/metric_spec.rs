use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayView1, ArrayView2};

use crate::head::{Head, PredictionKey};
use crate::{EstimatorError, Result};

type MetricFn = Arc<dyn Fn(ArrayView2<f64>, ArrayView1<f64>, ArrayView1<f64>) -> f64 + Send + Sync>;

/// Name of a custom metric, optionally paired with the prediction it reads.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKey {
    Name(String),
    /// Legacy `(metric name, prediction key)` form.
    Tuple(Vec<String>),
}

impl From<&str> for MetricKey {
    fn from(name: &str) -> Self {
        MetricKey::Name(name.to_string())
    }
}

impl From<String> for MetricKey {
    fn from(name: String) -> Self {
        MetricKey::Name(name)
    }
}

impl<const N: usize> From<[&str; N]> for MetricKey {
    fn from(parts: [&str; N]) -> Self {
        MetricKey::Tuple(parts.iter().map(|s| s.to_string()).collect())
    }
}

/// A metric function, called with `(predictions, labels, weights)`, and the
/// prediction it is computed on (the head's default when `None`).
#[derive(Clone)]
pub struct MetricSpec {
    metric_fn: MetricFn,
    prediction_key: Option<String>,
}

impl MetricSpec {
    pub fn new<F>(metric_fn: F) -> Self
    where
        F: Fn(ArrayView2<f64>, ArrayView1<f64>, ArrayView1<f64>) -> f64 + Send + Sync + 'static,
    {
        Self {
            metric_fn: Arc::new(metric_fn),
            prediction_key: None,
        }
    }

    pub fn prediction_key(mut self, key: impl Into<String>) -> Self {
        self.prediction_key = Some(key.into());
        self
    }

    pub fn compute(
        &self,
        predictions: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> f64 {
        (self.metric_fn)(predictions, labels, weights)
    }
}

impl fmt::Debug for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSpec")
            .field("prediction_key", &self.prediction_key)
            .finish_non_exhaustive()
    }
}

pub type Metrics = BTreeMap<MetricKey, MetricSpec>;

/// A custom metric checked against the head: output name and prediction key.
pub(crate) struct ResolvedMetric<'a> {
    pub name: String,
    pub key: PredictionKey,
    pub spec: &'a MetricSpec,
}

pub(crate) fn resolve_metrics<'a>(head: &Head, metrics: &'a Metrics) -> Result<Vec<ResolvedMetric<'a>>> {
    metrics
        .iter()
        .map(|(metric_key, spec)| {
            let (name, key) = match metric_key {
                MetricKey::Name(name) => (name.clone(), spec.prediction_key.clone()),
                MetricKey::Tuple(parts) => match parts.as_slice() {
                    [name, key] => (name.clone(), Some(key.clone())),
                    _ => return Err(EstimatorError::InvalidMetricKey(parts.clone())),
                },
            };
            let key = match key {
                None => head.default_prediction_key(),
                Some(key) => key
                    .parse::<PredictionKey>()
                    .ok()
                    .filter(|k| head.prediction_keys().contains(k))
                    .ok_or_else(|| EstimatorError::UnknownPredictionKey {
                        metric: name.clone(),
                        key,
                    })?,
            };
            Ok(ResolvedMetric { name, key, spec })
        })
        .collect()
}
