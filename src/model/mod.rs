//! Model module
//!
//! - `resnet`: bottleneck ResNet backbone and the scene classifier head
//! - `builder`: pretrained import, fresh heads and full restores
//! - `checkpoint`: weight files and their JSON sidecars

pub mod builder;
pub mod checkpoint;
pub mod resnet;

pub use builder::ModelBuilder;
pub use checkpoint::{save_checkpoint, CheckpointMetadata};
pub use resnet::{ClassifierOutput, ResNetConfig, SceneClassifier};
