//! Configuration structures for a cross-validation experiment.
//!
//! Everything a run needs (dataset root, metadata source, hyperparameters,
//! output locations) lives in one [`ExperimentConfig`] that is passed into the
//! driver. Files are TOML; every section has defaults so a config only needs
//! to name what differs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::metadata::{FoldOrdering, LabelMap};
use crate::model::ResNetConfig;
use crate::utils::error::{Result, SceneError};

/// Main configuration for a cross-validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Image data configuration
    pub data: DataConfig,
    /// Where fold metadata comes from
    pub metadata: MetadataConfig,
    /// Fold layout
    pub folds: FoldConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Output locations
    pub output: OutputConfig,
}

impl ExperimentConfig {
    /// Load a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SceneError::Config(format!("Failed to read config {}: {e}", path.display())))?;

        Self::from_toml(&content)
            .map_err(|e| SceneError::Config(format!("Failed to parse config {}: {e}", path.display())))
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SceneError::Config(e.to_string()))
    }

    /// Serialize to pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SceneError::Config(e.to_string()))
    }

    /// Label map derived from the configured label subset
    pub fn label_map(&self) -> LabelMap {
        LabelMap::new(self.metadata.labels.clone())
    }

    /// Number of output classes of the classifier
    pub fn num_classes(&self) -> usize {
        self.metadata.labels.len()
    }

    /// Architecture config for the configured model
    pub fn resnet_config(&self) -> ResNetConfig {
        ResNetConfig::new(self.model.blocks, self.num_classes())
            .with_base_width(self.model.base_width)
            .with_aux_head(self.model.aux_head)
    }

    /// Fold indices this run trains, in order
    pub fn fold_indices(&self) -> Vec<usize> {
        match &self.folds.run {
            Some(folds) => folds.clone(),
            None => (0..self.folds.num_folds).collect(),
        }
    }

    /// Check the configuration before any fold runs
    pub fn validate(&self) -> Result<()> {
        let labels = &self.metadata.labels;
        if labels.is_empty() {
            return Err(SceneError::Config("metadata.labels must not be empty".into()));
        }
        let unique: HashSet<_> = labels.iter().collect();
        if unique.len() != labels.len() {
            return Err(SceneError::Config(format!(
                "metadata.labels contains duplicates: {:?}",
                labels
            )));
        }
        if self.metadata.max_per_class == 0 {
            return Err(SceneError::Config("metadata.max_per_class must be > 0".into()));
        }
        if self.folds.num_folds < 2 {
            return Err(SceneError::Config(format!(
                "folds.num_folds must be at least 2, got {}",
                self.folds.num_folds
            )));
        }
        if let Some(run) = &self.folds.run {
            if let Some(bad) = run.iter().find(|&&f| f >= self.folds.num_folds) {
                return Err(SceneError::Config(format!(
                    "fold {} out of range 0..{}",
                    bad, self.folds.num_folds
                )));
            }
        }
        if self.data.image_size == 0 {
            return Err(SceneError::Config("data.image_size must be > 0".into()));
        }
        if self.model.blocks.iter().any(|&b| b == 0) || self.model.base_width == 0 {
            return Err(SceneError::Config(format!(
                "invalid architecture: blocks {:?}, base_width {}",
                self.model.blocks, self.model.base_width
            )));
        }
        if self.training.epochs == 0 {
            return Err(SceneError::Config("training.epochs must be > 0".into()));
        }
        if self.training.batch_size == 0 {
            return Err(SceneError::Config("training.batch_size must be > 0".into()));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(SceneError::Config(format!(
                "training.learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if let MetadataSource::Sqlite { table, .. } = &self.metadata.source {
            crate::metadata::query::validate_identifier(table)?;
        }
        Ok(())
    }
}

/// Image data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory the metadata's relative image paths are resolved against
    pub root: PathBuf,
    /// Square side length images are resized to
    pub image_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/images"),
            image_size: crate::IMAGE_SIZE,
        }
    }
}

/// Where the fold metadata is read from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataSource {
    /// Live query against a SQLite database
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_table")]
        table: String,
    },
    /// Pre-exported `fold_<k>_<split>.csv` files
    Csv { dir: PathBuf },
}

fn default_table() -> String {
    "images".to_string()
}

impl Default for MetadataSource {
    fn default() -> Self {
        MetadataSource::Sqlite {
            path: PathBuf::from("data/metadata.sqlite"),
            table: default_table(),
        }
    }
}

/// Metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub source: MetadataSource,
    /// Raw class labels to train on; their order defines class indices
    pub labels: Vec<i64>,
    /// Maximum number of samples drawn per class before fold bucketing
    pub max_per_class: usize,
    /// Per-class ordering used to assign fold buckets
    pub ordering: FoldOrdering,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataSource::default(),
            labels: vec![3, 8, 33],
            max_per_class: 200,
            ordering: FoldOrdering::default(),
        }
    }
}

/// Fold layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldConfig {
    /// Number of buckets each class is split into
    pub num_folds: usize,
    /// Subset of folds to run (all when absent)
    pub run: Option<Vec<usize>>,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            num_folds: crate::DEFAULT_NUM_FOLDS,
            run: None,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Bottleneck blocks per stage (`[3, 4, 6, 3]` is ResNet-50)
    pub blocks: [usize; 4],
    /// Channel width of the first stage
    pub base_width: usize,
    /// Whether to attach an auxiliary classifier to the third stage
    pub aux_head: bool,
    /// torchvision ResNet-50 `.pth` file with pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
    /// Directory with `fold_<k>` weight files to resume from
    pub restore_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            blocks: crate::model::resnet::RESNET50_BLOCKS,
            base_width: 64,
            aux_head: false,
            pretrained_weights: None,
            restore_dir: None,
        }
    }
}

/// Optimizer type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerType {
    /// SGD with momentum
    Sgd,
    /// Adam optimizer
    Adam,
}

impl std::fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerType::Sgd => write!(f, "sgd"),
            OptimizerType::Adam => write!(f, "adam"),
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of train+eval epochs per fold
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Learning rate
    pub learning_rate: f64,
    /// Optimizer type
    pub optimizer: OptimizerType,
    /// SGD momentum
    pub momentum: f64,
    /// Weight decay (L2 penalty), disabled at 0
    pub weight_decay: f64,
    /// Seed for per-epoch shuffling
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            optimizer: OptimizerType::Sgd,
            momentum: 0.9,
            weight_decay: 0.0,
            seed: 42,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the per-fold weights are written to after every epoch
    pub checkpoint_dir: Option<PathBuf>,
    /// CSV file receiving one row per fold and epoch
    pub metrics_csv: Option<PathBuf>,
}

/// Path of the weight file for a fold inside a checkpoint directory
pub fn fold_weights_path(dir: &Path, fold: usize) -> PathBuf {
    dir.join(format!("fold_{fold}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_classes(), 3);
        assert_eq!(config.fold_indices(), vec![0, 1, 2, 3, 4]);
        assert_eq!(config.training.optimizer, OptimizerType::Sgd);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ExperimentConfig::from_toml(
            r#"
            [data]
            root = "/srv/resisc45"

            [metadata]
            labels = [3, 8, 33, 40]
            max_per_class = 100
            source = { kind = "csv", dir = "exports" }

            [folds]
            run = [0, 2]

            [training]
            optimizer = "adam"
            epochs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.data.root, PathBuf::from("/srv/resisc45"));
        assert_eq!(config.data.image_size, crate::IMAGE_SIZE);
        assert_eq!(config.num_classes(), 4);
        assert_eq!(config.fold_indices(), vec![0, 2]);
        assert_eq!(config.training.optimizer, OptimizerType::Adam);
        assert_eq!(config.training.batch_size, 32);
        assert!(matches!(config.metadata.source, MetadataSource::Csv { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sqlite_source_default_table() {
        let config = ExperimentConfig::from_toml(
            r#"
            [metadata.source]
            kind = "sqlite"
            path = "meta.db"
            "#,
        )
        .unwrap();

        match config.metadata.source {
            MetadataSource::Sqlite { table, .. } => assert_eq!(table, "images"),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_fold() {
        let mut config = ExperimentConfig::default();
        config.folds.run = Some(vec![0, 5]);
        assert!(matches!(config.validate(), Err(SceneError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_labels() {
        let mut config = ExperimentConfig::default();
        config.metadata.labels = vec![3, 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let mut config = ExperimentConfig::default();
        config.metadata.source = MetadataSource::Sqlite {
            path: PathBuf::from("meta.db"),
            table: "images; drop table images".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_ordering() {
        let mut config = ExperimentConfig::default();
        config.metadata.ordering = FoldOrdering::Seeded { seed: 7 };
        let text = config.to_toml().unwrap();
        let parsed = ExperimentConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.metadata.ordering, FoldOrdering::Seeded { seed: 7 });
    }

    #[test]
    fn test_bundled_config_parses() {
        let config = ExperimentConfig::from_toml(include_str!("../config/resisc.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.metadata.labels, vec![3, 8, 33]);
        assert_eq!(config.model.blocks, crate::model::resnet::RESNET50_BLOCKS);
        assert_eq!(config.metadata.ordering, FoldOrdering::Seeded { seed: 42 });
    }

    #[test]
    fn test_fold_weights_path() {
        let path = fold_weights_path(Path::new("out"), 3);
        assert_eq!(path, PathBuf::from("out/fold_3"));
    }
}
