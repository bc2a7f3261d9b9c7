//! Pixel buffer to tensor conversion and face cropping.

use anyhow::{anyhow, Result};
use common::geometry::{Rect, Size};
use image::{imageops, RgbImage};
use ndarray::{Array, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorLayout {
    /// `[1, C, H, W]`
    Nchw,
    /// `[1, H, W, C]`
    Nhwc,
}

/// Per-channel `value = (pixel - mean[c]) * scale[c]`, channels indexed in
/// tensor order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub scale: [f32; 3],
}

impl Normalization {
    pub const fn new(mean: [f32; 3], scale: [f32; 3]) -> Self {
        Self { mean, scale }
    }

    /// Same mean and scale on every channel
    pub const fn uniform(mean: f32, scale: f32) -> Self {
        Self::new([mean; 3], [scale; 3])
    }

    /// Raw pixel values
    pub const fn identity() -> Self {
        Self::uniform(0.0, 1.0)
    }

    #[inline]
    fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 - self.mean[channel]) * self.scale[channel]
    }
}

/// Broadcast a 1- or 3-element vector to three channels
pub fn channel_values(values: &[f32]) -> Option<[f32; 3]> {
    match values {
        [v] => Some([*v; 3]),
        [a, b, c] => Some([*a, *b, *c]),
        _ => None,
    }
}

/// Convert an RGB buffer into a batch-of-one `f32` tensor.
pub fn image_to_tensor(
    image: &RgbImage,
    normalization: &Normalization,
    order: ChannelOrder,
    layout: TensorLayout,
) -> ArrayD<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let shape = match layout {
        TensorLayout::Nchw => [1, 3, h, w],
        TensorLayout::Nhwc => [1, h, w, 3],
    };
    let mut input = Array::zeros(IxDyn(&shape));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let source = match order {
                ChannelOrder::Rgb => c,
                ChannelOrder::Bgr => 2 - c,
            };
            let value = normalization.apply(c, pixel[source]);
            match layout {
                TensorLayout::Nchw => input[[0, c, y, x]] = value,
                TensorLayout::Nhwc => input[[0, y, x, c]] = value,
            }
        }
    }

    input
}

/// Crop `rect` out of `image`, clipped to the image bounds.
pub fn crop(image: &RgbImage, rect: Rect) -> Result<RgbImage> {
    let (x, y, w, h) = rect
        .pixel_bounds(Size::of(image))
        .ok_or_else(|| anyhow!("face region {:?} is empty after clipping", rect))?;
    Ok(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Exact (non aspect-preserving) resize to the model input size
pub fn resize_exact(image: &RgbImage, size: Size) -> RgbImage {
    imageops::resize(image, size.width, size.height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample() -> RgbImage {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(1, 0, Rgb([10, 20, 30]));
        img
    }

    #[test]
    fn test_nchw_rgb_layout() {
        let t = image_to_tensor(
            &sample(),
            &Normalization::identity(),
            ChannelOrder::Rgb,
            TensorLayout::Nchw,
        );
        assert_eq!(t.shape(), &[1, 3, 2, 4]);
        assert_eq!(t[[0, 0, 0, 1]], 10.0);
        assert_eq!(t[[0, 2, 0, 1]], 30.0);
    }

    #[test]
    fn test_nhwc_bgr_with_mean() {
        let norm = Normalization::new([1.0, 2.0, 3.0], [0.5, 0.5, 0.5]);
        let t = image_to_tensor(&sample(), &norm, ChannelOrder::Bgr, TensorLayout::Nhwc);
        assert_eq!(t.shape(), &[1, 2, 4, 3]);
        // channel 0 is blue
        assert_eq!(t[[0, 0, 1, 0]], (30.0 - 1.0) * 0.5);
        assert_eq!(t[[0, 0, 1, 2]], (10.0 - 3.0) * 0.5);
    }

    #[test]
    fn test_symmetric_normalization_range() {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 128]));
        let t = image_to_tensor(
            &img,
            &Normalization::uniform(127.5, 1.0 / 127.5),
            ChannelOrder::Rgb,
            TensorLayout::Nhwc,
        );
        assert!((t[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 0, 0, 1]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_channel_values() {
        assert_eq!(channel_values(&[2.0]), Some([2.0; 3]));
        assert_eq!(channel_values(&[1.0, 2.0, 3.0]), Some([1.0, 2.0, 3.0]));
        assert_eq!(channel_values(&[1.0, 2.0]), None);
    }

    #[test]
    fn test_crop_clips_and_rejects_empty() {
        let img = RgbImage::new(100, 50);
        let c = crop(&img, Rect::new(90.0, 40.0, 20.0, 20.0)).unwrap();
        assert_eq!(c.dimensions(), (10, 10));
        assert!(crop(&img, Rect::new(200.0, 0.0, 10.0, 10.0)).is_err());
    }
}
