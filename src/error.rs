use thiserror::Error;

/// Errors raised by feature transformation, training, evaluation and persistence.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("feature `{0}` not found in input batch")]
    MissingFeature(String),

    #[error("feature `{name}` has the wrong type: expected {expected}, got {actual}")]
    FeatureType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("shape mismatch for `{name}`: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("input batch has no labels")]
    MissingLabels,

    #[error("invalid label {label} at row {row}: {reason}")]
    InvalidLabel {
        row: usize,
        label: f64,
        reason: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown optimizer `{0}`, expected one of Adagrad, Ftrl, SGD")]
    UnknownOptimizer(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A metric asked for a prediction the head does not produce.
    #[error("unknown prediction key `{key}` for metric `{metric}`")]
    UnknownPredictionKey { metric: String, key: String },

    /// Tuple metric keys must be exactly `(metric name, prediction key)`.
    #[error("invalid metric key {0:?}: expected (metric name, prediction key)")]
    InvalidMetricKey(Vec<String>),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("model not fitted. Call fit() first or point model_dir at a checkpoint")]
    NotFitted,

    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("input produced no batches")]
    EmptyInput,

    #[error("malformed dataset: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EstimatorError>;
