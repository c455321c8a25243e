//! Weight files and their JSON sidecars
//!
//! A saved model is `<path>.mpk` (Burn's `CompactRecorder`) next to
//! `<path>.json`, which records the architecture and the metrics of the epoch
//! that produced the weights. The sidecar lets a restore reject an
//! incompatible file before touching the weights.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ResNetConfig, SceneClassifier};
use crate::training::metrics::EpochReport;
use crate::utils::error::{Result, SceneError};

/// Sidecar describing a saved model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub blocks: [usize; 4],
    pub base_width: usize,
    pub aux_head: bool,
    pub num_classes: usize,
    pub fold: usize,
    /// Zero-based epoch that produced the weights
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub eval_loss: f64,
    pub eval_accuracy: f64,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(config: &ResNetConfig, fold: usize, report: &EpochReport) -> Self {
        Self {
            blocks: config.blocks,
            base_width: config.base_width,
            aux_head: config.aux_head,
            num_classes: config.num_classes,
            fold,
            epoch: report.epoch,
            train_loss: report.train.loss,
            train_accuracy: report.train.accuracy,
            eval_loss: report.eval.loss,
            eval_accuracy: report.eval.accuracy,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Compare the recorded architecture against what a builder expects
    pub fn check_compatible(&self, config: &ResNetConfig) -> Result<()> {
        if self.num_classes != config.num_classes {
            return Err(SceneError::Load(format!(
                "checkpoint has {} classes, expected {}",
                self.num_classes, config.num_classes
            )));
        }
        if self.blocks != config.blocks
            || self.base_width != config.base_width
            || self.aux_head != config.aux_head
        {
            return Err(SceneError::Load(format!(
                "checkpoint architecture blocks {:?} width {} aux {} does not match blocks {:?} width {} aux {}",
                self.blocks,
                self.base_width,
                self.aux_head,
                config.blocks,
                config.base_width,
                config.aux_head
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SceneError::Load(format!("Failed to serialize checkpoint metadata: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| SceneError::Load(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| SceneError::Load(format!("Corrupt checkpoint metadata {}: {e}", path.display())))
    }
}

/// Path of the weight file for `path`
pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Path of the sidecar for `path`
pub fn metadata_file(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Write `<path>.mpk` and `<path>.json`, replacing earlier versions
pub fn save_checkpoint<B: Backend>(
    model: &SceneClassifier<B>,
    path: &Path,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| SceneError::Load(format!("Failed to save model to {}: {e:?}", path.display())))?;
    metadata.save(&metadata_file(path))?;

    debug!(path = %path.display(), epoch = metadata.epoch, "Checkpoint written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::EpochMetrics;
    use tempfile::TempDir;

    fn report() -> EpochReport {
        EpochReport {
            epoch: 2,
            train: EpochMetrics::new(0.5, 16, 12),
            eval: EpochMetrics::new(0.7, 8, 5),
            duration_secs: 1.5,
        }
    }

    #[test]
    fn test_extensions() {
        let path = Path::new("checkpoints/fold_3");
        assert_eq!(weights_file(path), PathBuf::from("checkpoints/fold_3.mpk"));
        assert_eq!(metadata_file(path), PathBuf::from("checkpoints/fold_3.json"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = ResNetConfig::resnet50(3);
        let metadata = CheckpointMetadata::new(&config, 1, &report());
        let path = dir.path().join("fold_1.json");

        metadata.save(&path).unwrap();
        let loaded = CheckpointMetadata::load(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.epoch, 2);
        assert!((loaded.train_accuracy - 0.75).abs() < 1e-12);
        assert!(loaded.check_compatible(&config).is_ok());
    }

    #[test]
    fn test_incompatible_class_count() {
        let metadata = CheckpointMetadata::new(&ResNetConfig::resnet50(3), 0, &report());
        let result = metadata.check_compatible(&ResNetConfig::resnet50(5));
        assert!(matches!(result, Err(SceneError::Load(_))));
    }

    #[test]
    fn test_corrupt_sidecar_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fold_0.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CheckpointMetadata::load(&path), Err(SceneError::Load(_))));
    }
}
