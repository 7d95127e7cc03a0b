//! JSON checkpoints of training state and exported serving bundles.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::estimator::TrainingState;
use crate::feature_column::FeatureColumn;
use crate::head::{Head, Predictions};
use crate::model::LinearModel;
use crate::{EstimatorError, InputBatch, Result};

const FORMAT_VERSION: u32 = 1;
const CHECKPOINT_FILE: &str = "checkpoint.json";
const EXPORT_FILE: &str = "export.json";

/// What a checkpoint must agree on to be restored into an estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Signature {
    pub head: Head,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    format_version: u32,
    signature: Signature,
    state: TrainingState,
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    let result = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = result {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    fs::rename(&temp, path)?;
    Ok(())
}

pub(crate) fn save(model_dir: &Path, signature: &Signature, state: &TrainingState) -> Result<PathBuf> {
    fs::create_dir_all(model_dir)?;
    let path = model_dir.join(CHECKPOINT_FILE);
    let checkpoint = Checkpoint {
        format_version: FORMAT_VERSION,
        signature: signature.clone(),
        state: state.clone(),
    };
    write_atomic(&path, &serde_json::to_vec(&checkpoint)?)?;
    info!(path = %path.display(), global_step = state.global_step, "saved checkpoint");
    Ok(path)
}

/// The state stored in `model_dir`, or `None` when no checkpoint exists yet.
pub(crate) fn load(model_dir: &Path, signature: &Signature) -> Result<Option<TrainingState>> {
    let path = model_dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        debug!(path = %path.display(), "no checkpoint to restore");
        return Ok(None);
    }
    let checkpoint: Checkpoint = serde_json::from_slice(&fs::read(&path)?)?;
    if checkpoint.format_version != FORMAT_VERSION {
        return Err(EstimatorError::CheckpointMismatch(format!(
            "format version {} is not supported",
            checkpoint.format_version
        )));
    }
    if &checkpoint.signature != signature {
        return Err(EstimatorError::CheckpointMismatch(
            "feature columns or head differ from the estimator's".to_string(),
        ));
    }
    info!(
        path = %path.display(),
        global_step = checkpoint.state.global_step,
        "restored checkpoint"
    );
    Ok(Some(checkpoint.state))
}

/// A trained model packaged for serving.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportedModel {
    format_version: u32,
    global_step: u64,
    head: Head,
    model: LinearModel,
}

impl ExportedModel {
    pub(crate) fn new(head: Head, model: LinearModel, global_step: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            global_step,
            head,
            model,
        }
    }

    /// Writes the bundle to `<export_dir>/<global_step>/export.json` and
    /// returns the versioned directory.
    pub(crate) fn save(&self, export_dir: &Path) -> Result<PathBuf> {
        let version_dir = export_dir.join(self.global_step.to_string());
        fs::create_dir_all(&version_dir)?;
        write_atomic(
            &version_dir.join(EXPORT_FILE),
            &serde_json::to_vec_pretty(self)?,
        )?;
        info!(path = %version_dir.display(), "exported model");
        Ok(version_dir)
    }

    /// Loads a bundle from its versioned directory or from the file itself.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(EXPORT_FILE)
        } else {
            path.to_path_buf()
        };
        let exported: Self = serde_json::from_slice(&fs::read(&file)?)?;
        if exported.format_version != FORMAT_VERSION {
            return Err(EstimatorError::CheckpointMismatch(format!(
                "export format version {} is not supported",
                exported.format_version
            )));
        }
        Ok(exported)
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn head(&self) -> Head {
        self.head
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn predict(&self, batch: &InputBatch) -> Result<Predictions> {
        batch.validate()?;
        Ok(self.head.predictions(self.model.logits_for(batch)?))
    }
}
