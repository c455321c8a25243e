//! Cross-validation driver
//!
//! Each fold gets its own partition, datasets, model and optimizer; nothing
//! carries over from one fold to the next.

use burn::optim::{
    decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, SgdConfig,
};
use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use super::metrics::FoldReport;
use super::trainer::{FoldTrainer, ProgressEvent, TrainerSettings};
use crate::config::{fold_weights_path, ExperimentConfig, OptimizerType};
use crate::dataset::{ImageLoader, SceneDataset};
use crate::metadata::MetadataProvider;
use crate::model::{ModelBuilder, SceneClassifier};
use crate::utils::error::{Result, SceneError};

/// Runs the configured folds one after another
pub struct CrossValidator<B: AutodiffBackend> {
    config: ExperimentConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> CrossValidator<B> {
    pub fn new(config: ExperimentConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run every configured fold, stopping at the first error
    pub fn run(
        &self,
        provider: &dyn MetadataProvider,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<Vec<FoldReport>> {
        self.config.validate()?;
        if provider.num_folds() != self.config.folds.num_folds {
            return Err(SceneError::Config(format!(
                "metadata provider has {} folds, configuration expects {}",
                provider.num_folds(),
                self.config.folds.num_folds
            )));
        }

        let folds = self.config.fold_indices();
        info!("Running {} of {} folds: {:?}", folds.len(), self.config.folds.num_folds, folds);

        let mut reports = Vec::with_capacity(folds.len());
        for fold in folds {
            reports.push(self.run_fold(provider, fold, progress)?);
        }
        Ok(reports)
    }

    /// Fetch, build and train a single fold
    pub fn run_fold(
        &self,
        provider: &dyn MetadataProvider,
        fold: usize,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<FoldReport> {
        let config = &self.config;
        let partition = provider.fold_partition(fold)?;

        let labels = config.label_map();
        let loader = ImageLoader::new(&config.data.root, config.data.image_size);
        let train = SceneDataset::new(partition.train, loader.clone(), labels.clone())?;
        let test = SceneDataset::new(partition.test, loader, labels)?;

        let architecture = config.resnet_config();
        let builder = ModelBuilder::<B>::new(architecture.clone(), self.device.clone())
            .with_pretrained(config.model.pretrained_weights.clone());
        let restore = config
            .model
            .restore_dir
            .as_ref()
            .map(|dir| fold_weights_path(dir, fold));
        let model = builder.build(architecture.num_classes, restore.as_deref())?;
        info!(
            fold,
            classes = model.num_classes(),
            aux_head = model.has_aux_head(),
            restored = restore.is_some(),
            "Model ready"
        );

        let checkpoint = config
            .output
            .checkpoint_dir
            .as_ref()
            .map(|dir| fold_weights_path(dir, fold));

        let params = &config.training;
        let settings = TrainerSettings {
            epochs: params.epochs,
            batch_size: params.batch_size,
            learning_rate: params.learning_rate,
            seed: params.seed,
        };
        let trainer = FoldTrainer::<B>::new(settings, architecture, self.device.clone());
        let weight_decay =
            (params.weight_decay > 0.0).then(|| WeightDecayConfig::new(params.weight_decay as f32));

        let (_, report) = match params.optimizer {
            OptimizerType::Sgd => {
                let mut optimizer = SgdConfig::new()
                    .with_momentum(Some(
                        MomentumConfig::new()
                            .with_momentum(params.momentum)
                            .with_dampening(0.0),
                    ))
                    .with_weight_decay(weight_decay)
                    .init::<B, SceneClassifier<B>>();
                trainer.run(
                    fold,
                    model,
                    &mut optimizer,
                    &train,
                    &test,
                    checkpoint.as_deref(),
                    progress,
                )?
            }
            OptimizerType::Adam => {
                let mut optimizer = AdamConfig::new()
                    .with_weight_decay(weight_decay)
                    .init::<B, SceneClassifier<B>>();
                trainer.run(
                    fold,
                    model,
                    &mut optimizer,
                    &train,
                    &test,
                    checkpoint.as_deref(),
                    progress,
                )?
            }
        };

        Ok(report)
    }
}
