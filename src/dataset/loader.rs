//! Image sample loader
//!
//! Resolves a metadata record against the dataset root, decodes the file and
//! runs it through [`preprocess`](super::preprocess::preprocess).

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::trace;

use super::preprocess::preprocess;
use super::ImageItem;
use crate::metadata::{LabelMap, SampleRecord};
use crate::utils::error::{Result, SceneError};

/// Loads and preprocesses images below a dataset root
#[derive(Debug, Clone)]
pub struct ImageLoader {
    root: PathBuf,
    image_size: usize,
}

impl ImageLoader {
    pub fn new(root: impl Into<PathBuf>, image_size: usize) -> Self {
        Self {
            root: root.into(),
            image_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Number of floats in one preprocessed image
    pub fn item_len(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    /// Decode and preprocess the image at `relative` below the root
    pub fn load_image(&self, relative: &Path) -> Result<Vec<f32>> {
        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(SceneError::FileNotFound(path));
        }

        let img = ImageReader::open(&path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| SceneError::Decode(path.clone(), e.to_string()))?;

        trace!(path = %path.display(), width = img.width(), height = img.height(), "Decoded image");
        Ok(preprocess(&img, self.image_size))
    }

    /// Load one record, mapping its raw label through `labels`
    pub fn load(&self, record: &SampleRecord, labels: &LabelMap) -> Result<ImageItem> {
        let label = labels.index_of(record.class_label)?;
        let image = self.load_image(&record.image_path)?;
        Ok(ImageItem {
            image,
            label,
            id: record.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn labels() -> LabelMap {
        LabelMap::new(vec![3, 8, 33])
    }

    #[test]
    fn test_load_rgb_and_grayscale_images() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("airport")).unwrap();
        RgbImage::from_pixel(64, 48, Rgb([200, 100, 50]))
            .save(dir.path().join("airport/1.png"))
            .unwrap();
        GrayImage::from_pixel(13, 29, Luma([90]))
            .save(dir.path().join("airport/2.png"))
            .unwrap();

        let loader = ImageLoader::new(dir.path(), 32);
        let first = loader
            .load(&SampleRecord::new(1, "airport/1.png", 8), &labels())
            .unwrap();
        let second = loader
            .load(&SampleRecord::new(2, "airport/2.png", 33), &labels())
            .unwrap();

        assert_eq!(first.image.len(), loader.item_len());
        assert_eq!(second.image.len(), loader.item_len());
        assert_eq!(first.label, 1);
        assert_eq!(second.label, 2);
        assert_eq!(second.id.as_str(), "2");
    }

    #[test]
    fn test_format_guessed_from_content() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("scene.png");
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&png).unwrap();
        fs::rename(&png, dir.path().join("scene.jpg")).unwrap();

        let loader = ImageLoader::new(dir.path(), 16);
        assert_eq!(loader.load_image(Path::new("scene.jpg")).unwrap().len(), 3 * 16 * 16);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(dir.path(), 32);
        let result = loader.load(&SampleRecord::new(1, "missing.jpg", 3), &labels());
        assert!(matches!(result, Err(SceneError::FileNotFound(p)) if p.ends_with("missing.jpg")));
    }

    #[test]
    fn test_undecodable_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.jpg"), b"definitely not an image").unwrap();
        let loader = ImageLoader::new(dir.path(), 32);
        let result = loader.load(&SampleRecord::new(1, "broken.jpg", 3), &labels());
        assert!(matches!(result, Err(SceneError::Decode(_, _))));
    }

    #[test]
    fn test_unknown_label() {
        let dir = TempDir::new().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
        let loader = ImageLoader::new(dir.path(), 8);
        let result = loader.load(&SampleRecord::new(1, "a.png", 99), &labels());
        assert!(matches!(result, Err(SceneError::MetadataFormat(_))));
    }
}
