//! Image preprocessing: RGB conversion, resize, CHW layout, normalization

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::{IMAGENET_MEAN, IMAGENET_STD};

/// Full pipeline: RGB8, `size x size` bilinear resize, CHW in `[0, 1]`, ImageNet normalization
pub fn preprocess(img: &DynamicImage, size: usize) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, size as u32, size as u32, FilterType::Triangle);
    let mut chw = to_chw(&resized);
    normalize(&mut chw, size * size, IMAGENET_MEAN, IMAGENET_STD);
    chw
}

/// Convert an RGB image into a CHW float buffer scaled to `[0, 1]`
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        data[offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }
    data
}

/// Per-channel `(x - mean) / std` over a CHW buffer with `plane` values per channel
pub fn normalize(chw: &mut [f32], plane: usize, mean: [f32; 3], std: [f32; 3]) {
    for (channel, values) in chw.chunks_mut(plane).enumerate().take(3) {
        for v in values {
            *v = (*v - mean[channel]) / std[channel];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbaImage};

    #[test]
    fn test_to_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 51]));

        let data = to_chw(&img);
        assert_eq!(data.len(), 6);
        assert_eq!(&data[0..2], &[1.0, 0.0]);
        assert_eq!(&data[2..4], &[0.0, 1.0]);
        assert!((data[5] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_uses_channel_statistics() {
        let mut data = vec![0.485, 0.456, 0.406];
        normalize(&mut data, 1, IMAGENET_MEAN, IMAGENET_STD);
        for v in data {
            assert!(v.abs() < 1e-6);
        }
    }

    #[test]
    fn test_preprocess_fixed_shape_for_any_input() {
        let inputs = vec![
            DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 170, Rgb([10, 200, 30]))),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(17, 61, Luma([128]))),
            DynamicImage::ImageRgba8(RgbaImage::new(8, 8)),
        ];
        for img in &inputs {
            assert_eq!(preprocess(img, 32).len(), 3 * 32 * 32);
        }
    }

    #[test]
    fn test_grayscale_replicated_across_channels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([255])));
        let data = preprocess(&img, 4);
        for channel in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            assert!((data[channel * 16] - expected).abs() < 1e-5);
        }
    }
}
