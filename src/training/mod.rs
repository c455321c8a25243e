//! Training module
//!
//! - `trainer`: the per-fold train/evaluate loop and its progress events
//! - `cross_validation`: runs folds with fresh models and optimizers
//! - `loss`: training objective and accuracy counting
//! - `metrics`: epoch and fold reports

pub mod cross_validation;
pub mod loss;
pub mod metrics;
pub mod trainer;

pub use cross_validation::CrossValidator;
pub use metrics::{EpochMetrics, EpochReport, FoldReport, MetricAccumulator};
pub use trainer::{FoldTrainer, Phase, ProgressEvent, TrainerSettings};
