//! Dataset module
//!
//! Turns the records of one fold side into preprocessed image items and
//! batches of tensors:
//!
//! - `preprocess`: RGB conversion, resize, CHW layout and normalization
//! - `loader`: resolves records against the dataset root and decodes them
//! - `batcher`: lazy, optionally shuffled batches and the Burn batcher

pub mod batcher;
pub mod loader;
pub mod preprocess;

use serde::{Deserialize, Serialize};

use crate::metadata::{LabelMap, SampleId, SampleRecord};
use crate::utils::error::Result;

pub use batcher::{BatchIterator, SceneBatch, SceneBatcher};
pub use loader::ImageLoader;

/// A preprocessed image ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageItem {
    /// Normalized image data as flattened CHW array [3 * H * W]
    pub image: Vec<f32>,
    /// Class index (position of the raw label in the [`LabelMap`])
    pub label: usize,
    pub id: SampleId,
}

/// Random access to items that may fail to load
pub trait IndexedDataset<I>: Sync {
    fn len(&self) -> usize;

    fn item(&self, index: usize) -> Result<I>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The records of one fold side, decoded on access
#[derive(Debug, Clone)]
pub struct SceneDataset {
    records: Vec<SampleRecord>,
    loader: ImageLoader,
    labels: LabelMap,
}

impl SceneDataset {
    /// Create a dataset; every record's label must be in `labels`
    pub fn new(records: Vec<SampleRecord>, loader: ImageLoader, labels: LabelMap) -> Result<Self> {
        for record in &records {
            labels.index_of(record.class_label)?;
        }
        Ok(Self {
            records,
            loader,
            labels,
        })
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn image_size(&self) -> usize {
        self.loader.image_size()
    }
}

impl IndexedDataset<ImageItem> for SceneDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn item(&self, index: usize) -> Result<ImageItem> {
        let record = self.records.get(index).ok_or_else(|| {
            crate::SceneError::MetadataFormat(format!(
                "index {} out of range for {} records",
                index,
                self.records.len()
            ))
        })?;
        self.loader.load(record, &self.labels)
    }
}
