//! Per-fold training/evaluation loop
//!
//! A fold runs `epochs` rounds of one shuffled training pass followed by one
//! evaluation pass over the held-out side. When a checkpoint path is given,
//! the weights are written after every epoch, each write replacing the last.

use std::path::Path;
use std::time::Instant;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::loss::{classification_loss, count_correct, ensure_finite};
use super::metrics::{EpochMetrics, EpochReport, FoldReport, MetricAccumulator};
use crate::dataset::{BatchIterator, ImageItem, IndexedDataset, SceneBatch, SceneBatcher, SceneDataset};
use crate::model::{save_checkpoint, CheckpointMetadata, ResNetConfig, SceneClassifier};
use crate::utils::error::Result;
use crate::utils::TrainingLogger;

/// Hyperparameters of the loop
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Base seed; fold `k` shuffles with `seed + k`
    pub seed: u64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

/// Pass over a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Eval => write!(f, "eval"),
        }
    }
}

/// Progress notifications sent to the caller's callback
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    FoldStarted {
        fold: usize,
        epochs: usize,
        train_samples: usize,
        test_samples: usize,
    },
    BatchCompleted {
        fold: usize,
        epoch: usize,
        phase: Phase,
        /// Zero-based batch index
        batch: usize,
        num_batches: usize,
        /// Metrics over the batches of this pass so far
        running: EpochMetrics,
    },
    EpochCompleted {
        fold: usize,
        report: EpochReport,
    },
    FoldCompleted {
        fold: usize,
        final_eval: EpochMetrics,
    },
}

/// Runs the training/evaluation loop for one fold
pub struct FoldTrainer<B: AutodiffBackend> {
    settings: TrainerSettings,
    architecture: ResNetConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> FoldTrainer<B> {
    pub fn new(settings: TrainerSettings, architecture: ResNetConfig, device: B::Device) -> Self {
        Self {
            settings,
            architecture,
            device,
        }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Train `model` on `train`, evaluating on `test` after every epoch
    ///
    /// Returns the trained model and the per-epoch metrics. The first error
    /// (missing image, decode failure, non-finite loss, failed write) aborts
    /// the fold.
    #[allow(clippy::too_many_arguments)]
    pub fn run<O>(
        &self,
        fold: usize,
        mut model: SceneClassifier<B>,
        optimizer: &mut O,
        train: &SceneDataset,
        test: &SceneDataset,
        checkpoint: Option<&Path>,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<(SceneClassifier<B>, FoldReport)>
    where
        O: Optimizer<SceneClassifier<B>, B>,
    {
        let epochs = self.settings.epochs;
        let mut logger = TrainingLogger::new(fold, epochs);
        logger.start_fold(train.len(), test.len());
        progress(ProgressEvent::FoldStarted {
            fold,
            epochs,
            train_samples: train.len(),
            test_samples: test.len(),
        });

        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed.wrapping_add(fold as u64));
        let mut reports = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            logger.start_epoch(epoch);
            let started = Instant::now();

            let (trained, train_metrics) =
                self.train_epoch(fold, epoch, model, optimizer, train, &mut rng, progress)?;
            model = trained;
            let eval_metrics = self.eval_epoch(fold, epoch, &model, test, progress)?;

            let report = EpochReport {
                epoch,
                train: train_metrics,
                eval: eval_metrics,
                duration_secs: started.elapsed().as_secs_f64(),
            };
            logger.end_epoch(&report);

            if let Some(path) = checkpoint {
                let metadata = CheckpointMetadata::new(&self.architecture, fold, &report);
                save_checkpoint(&model, path, &metadata)?;
            }

            progress(ProgressEvent::EpochCompleted {
                fold,
                report: report.clone(),
            });
            reports.push(report);
        }

        let report = FoldReport {
            fold,
            train_samples: train.len(),
            test_samples: test.len(),
            epochs: reports,
            checkpoint: checkpoint.map(Path::to_path_buf),
        };
        let final_eval = report.final_eval();
        logger.finish_fold(final_eval.accuracy);
        progress(ProgressEvent::FoldCompleted { fold, final_eval });

        Ok((model, report))
    }

    #[allow(clippy::too_many_arguments)]
    fn train_epoch<O>(
        &self,
        fold: usize,
        epoch: usize,
        mut model: SceneClassifier<B>,
        optimizer: &mut O,
        dataset: &SceneDataset,
        rng: &mut ChaCha8Rng,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<(SceneClassifier<B>, EpochMetrics)>
    where
        O: Optimizer<SceneClassifier<B>, B>,
    {
        let batcher = SceneBatcher::new(dataset.image_size());
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut accumulator = MetricAccumulator::default();

        let batches = BatchIterator::<_, ImageItem>::new(dataset, self.settings.batch_size, Some(rng));
        let num_batches = batches.num_batches();

        for (index, items) in batches.enumerate() {
            let batch: SceneBatch<B> = batcher.try_batch(items?, &self.device)?;
            let batch_len = batch.len();

            let output = model.forward_train(batch.images);
            let loss = classification_loss(&loss_fn, &output, batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            ensure_finite(loss_value, "training")?;

            let correct = count_correct(output.logits, batch.targets);
            accumulator.update(loss_value, batch_len, correct);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(self.settings.learning_rate, model, grads);

            progress(ProgressEvent::BatchCompleted {
                fold,
                epoch,
                phase: Phase::Train,
                batch: index,
                num_batches,
                running: accumulator.metrics(),
            });
        }

        Ok((model, accumulator.metrics()))
    }

    fn eval_epoch(
        &self,
        fold: usize,
        epoch: usize,
        model: &SceneClassifier<B>,
        dataset: &SceneDataset,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<EpochMetrics> {
        let model = model.valid();
        let batcher = SceneBatcher::new(dataset.image_size());
        let loss_fn = CrossEntropyLossConfig::new().init::<B::InnerBackend>(&self.device);
        let mut accumulator = MetricAccumulator::default();

        let batches = BatchIterator::<_, ImageItem>::new(dataset, self.settings.batch_size, None);
        let num_batches = batches.num_batches();

        for (index, items) in batches.enumerate() {
            let batch: SceneBatch<B> = batcher.try_batch(items?, &self.device)?;
            let batch_len = batch.len();
            let images = batch.images.inner();
            let targets = batch.targets.inner();

            let logits = model.forward(images);
            let loss = loss_fn.forward(logits.clone(), targets.clone());
            let loss_value: f64 = loss.into_scalar().elem();
            ensure_finite(loss_value, "evaluation")?;

            accumulator.update(loss_value, batch_len, count_correct(logits, targets));

            progress(ProgressEvent::BatchCompleted {
                fold,
                epoch,
                phase: Phase::Eval,
                batch: index,
                num_batches,
                running: accumulator.metrics(),
            });
        }

        Ok(accumulator.metrics())
    }
}
