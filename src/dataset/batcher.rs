//! Batching
//!
//! [`BatchIterator`] walks a dataset in fixed-size batches, shuffled for
//! training and in stored order for evaluation, decoding the items of each
//! batch in parallel. [`SceneBatcher`] turns a batch of items into tensors.

use std::marker::PhantomData;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::{ImageItem, IndexedDataset};
use crate::metadata::SampleId;
use crate::utils::error::{Result, SceneError};

/// Lazy batch iterator over an indexed dataset
///
/// Every index is visited exactly once per pass; the last batch may be short.
/// Loading stops at the first item that fails.
pub struct BatchIterator<'a, D, I> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    _item: PhantomData<fn() -> I>,
}

impl<'a, D, I> BatchIterator<'a, D, I>
where
    D: IndexedDataset<I>,
    I: Send,
{
    /// Create an iterator; a given RNG shuffles the visiting order
    pub fn new(dataset: &'a D, batch_size: usize, shuffle: Option<&mut ChaCha8Rng>) -> Self {
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if let Some(rng) = shuffle {
            order.shuffle(rng);
        }
        Self {
            dataset,
            order,
            batch_size: batch_size.max(1),
            cursor: 0,
            _item: PhantomData,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Visiting order of this pass
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<D, I> Iterator for BatchIterator<'_, D, I>
where
    D: IndexedDataset<I>,
    I: Send,
{
    type Item = Result<Vec<I>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        let dataset = self.dataset;

        let items: Result<Vec<I>> = indices.par_iter().map(|&i| dataset.item(i)).collect();
        self.cursor = if items.is_ok() { end } else { self.order.len() };
        Some(items)
    }
}

/// A batch of images with class targets
#[derive(Clone, Debug)]
pub struct SceneBatch<B: Backend> {
    /// Images [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class indices [batch_size]
    pub targets: Tensor<B, 1, Int>,
    pub ids: Vec<SampleId>,
}

impl<B: Backend> SceneBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Stacks preprocessed items into tensors
#[derive(Clone, Debug)]
pub struct SceneBatcher {
    image_size: usize,
}

impl SceneBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    /// Check that every item holds a `3 x size x size` image
    pub fn check(&self, items: &[ImageItem]) -> Result<()> {
        let expected = 3 * self.image_size * self.image_size;
        if let Some(bad) = items.iter().find(|item| item.image.len() != expected) {
            return Err(SceneError::Compute(format!(
                "sample '{}' has {} values, expected {} for {}x{} RGB",
                bad.id,
                bad.image.len(),
                expected,
                self.image_size,
                self.image_size
            )));
        }
        Ok(())
    }

    /// Checked batching
    pub fn try_batch<B: Backend>(&self, items: Vec<ImageItem>, device: &B::Device) -> Result<SceneBatch<B>> {
        self.check(&items)?;
        Ok(<Self as Batcher<B, ImageItem, SceneBatch<B>>>::batch(self, items, device))
    }
}

/// # Panics
///
/// Panics if an item's image length does not match the batcher's image size;
/// use [`SceneBatcher::try_batch`] for unvalidated items.
impl<B: Backend> Batcher<B, ImageItem, SceneBatch<B>> for SceneBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> SceneBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        let mut ids = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend_from_slice(&item.image);
            targets_data.push(item.label as i64);
            ids.push(item.id);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        SceneBatch {
            images,
            targets,
            ids,
        }
    }
}
