//! Epoch and fold bookkeeping

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Loss and accuracy over one pass of a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Mean per-sample loss
    pub loss: f64,
    /// Fraction of correct predictions in `[0, 1]`
    pub accuracy: f64,
    pub samples: usize,
    pub correct: usize,
}

impl EpochMetrics {
    pub fn new(loss: f64, samples: usize, correct: usize) -> Self {
        let accuracy = if samples == 0 {
            0.0
        } else {
            correct as f64 / samples as f64
        };
        Self {
            loss,
            accuracy,
            samples,
            correct,
        }
    }
}

/// Running totals over the batches of a pass
///
/// Batch losses are weighted by batch size, so a short final batch counts
/// for exactly its number of samples.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    samples: usize,
    correct: usize,
}

impl MetricAccumulator {
    pub fn update(&mut self, batch_loss: f64, batch_len: usize, correct: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.samples += batch_len;
        self.correct += correct;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn metrics(&self) -> EpochMetrics {
        let loss = if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        };
        EpochMetrics::new(loss, self.samples, self.correct)
    }
}

/// Train and evaluation metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// Zero-based epoch index
    pub epoch: usize,
    pub train: EpochMetrics,
    pub eval: EpochMetrics,
    pub duration_secs: f64,
}

/// Everything a fold produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub epochs: Vec<EpochReport>,
    /// Weight file path (without extension) when checkpoints were written
    pub checkpoint: Option<PathBuf>,
}

impl FoldReport {
    pub fn last_epoch(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }

    /// Evaluation metrics of the final epoch
    pub fn final_eval(&self) -> EpochMetrics {
        self.last_epoch().map(|e| e.eval).unwrap_or_default()
    }

    pub fn best_eval_accuracy(&self) -> f64 {
        self.epochs
            .iter()
            .map(|e| e.eval.accuracy)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_weights_by_batch_size() {
        let mut acc = MetricAccumulator::default();
        acc.update(1.0, 8, 6);
        acc.update(2.0, 8, 2);
        acc.update(4.0, 4, 4);

        let metrics = acc.metrics();
        assert_eq!(metrics.samples, 20);
        assert_eq!(metrics.correct, 12);
        assert!((metrics.loss - (8.0 + 16.0 + 16.0) / 20.0).abs() < 1e-12);
        assert!((metrics.accuracy - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_accumulator_reports_zero() {
        let metrics = MetricAccumulator::default().metrics();
        assert_eq!(metrics, EpochMetrics::default());
    }

    #[test]
    fn test_fold_report_summaries() {
        let report = FoldReport {
            fold: 2,
            train_samples: 16,
            test_samples: 4,
            epochs: vec![
                EpochReport {
                    epoch: 0,
                    train: EpochMetrics::new(1.2, 16, 8),
                    eval: EpochMetrics::new(1.0, 4, 3),
                    duration_secs: 2.0,
                },
                EpochReport {
                    epoch: 1,
                    train: EpochMetrics::new(0.9, 16, 12),
                    eval: EpochMetrics::new(1.1, 4, 2),
                    duration_secs: 2.0,
                },
            ],
            checkpoint: None,
        };

        assert_eq!(report.final_eval().accuracy, 0.5);
        assert_eq!(report.best_eval_accuracy(), 0.75);
        assert_eq!(report.last_epoch().map(|e| e.epoch), Some(1));
    }
}
