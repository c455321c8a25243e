//! # scene_transfer
//!
//! Transfer learning of a pretrained ResNet-50 on remote-sensing scene images,
//! evaluated with stratified k-fold cross-validation. Built on the Burn framework.
//!
//! ## Features
//!
//! - **Stratified folds** drawn from a SQLite metadata table or exported CSV files
//! - **Pretrained backbone** imported from a torchvision `resnet50` checkpoint
//! - **Per-fold training** with a fresh model, optimizer and checkpoint per fold
//! - **CPU or GPU** execution (NdArray by default, CUDA behind the `cuda` feature)
//!
//! ## Modules
//!
//! - `metadata`: Fold partitions from SQLite or CSV, and CSV export
//! - `dataset`: Image decoding, normalization and batching
//! - `model`: ResNet backbone, classifier head and weight loading
//! - `training`: Training/evaluation loop and the cross-validation driver
//! - `config`: Experiment configuration loaded from TOML
//! - `utils`: Logging, errors and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scene_transfer::backend::{default_device, TrainingBackend};
//! use scene_transfer::{config::ExperimentConfig, metadata, training::CrossValidator};
//!
//! let config = ExperimentConfig::load("config/resisc.toml".as_ref())?;
//! let provider = metadata::open_provider(&config)?;
//! let reports = CrossValidator::<TrainingBackend>::new(config, default_device())
//!     .run(provider.as_ref(), &mut |_event| {})?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod metadata;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::ExperimentConfig;
pub use dataset::{ImageItem, ImageLoader, SceneBatch, SceneBatcher, SceneDataset};
pub use metadata::{FoldPartition, LabelMap, MetadataProvider, SampleId, SampleRecord, Split};
pub use model::{ModelBuilder, ResNetConfig, SceneClassifier};
pub use training::{CrossValidator, FoldReport, FoldTrainer, ProgressEvent};
pub use utils::error::{Result, SceneError};

/// Default side length images are resized to
pub const IMAGE_SIZE: usize = 224;

/// Per-channel ImageNet mean the pretrained backbone was trained with
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Default number of cross-validation folds
pub const DEFAULT_NUM_FOLDS: usize = 5;

/// Weight of the auxiliary classifier's loss in the training objective
pub const AUX_LOSS_WEIGHT: f64 = 0.4;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
