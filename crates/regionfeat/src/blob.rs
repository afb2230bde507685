use std::path::Path;
use std::sync::OnceLock;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::config::InputConfig;
use crate::error::ImageError;

/// A decoded image prepared as model input: resized so the shorter side
/// reaches `test_scale` (longer side capped at `max_size`), mean-subtracted,
/// laid out channel-first in BGR order.
///
/// Decoding and sizing happen eagerly. The pixel buffer is only built on the
/// first call to [`ImageBlob::data`], so backends that read the image
/// themselves (such as the command backend, which receives the path) never
/// pay for the resize.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    /// Height of the decoded source image.
    pub image_h: u32,
    /// Width of the decoded source image.
    pub image_w: u32,
    /// Height of the resized input.
    pub height: u32,
    /// Width of the resized input.
    pub width: u32,
    /// Factor from source coordinates to input coordinates.
    pub scale: f32,
    source: RgbImage,
    pixel_mean: [f32; 3],
    data: OnceLock<Vec<f32>>,
}

impl ImageBlob {
    pub fn load(path: &Path, input: &InputConfig) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path).map_err(|e| ImageError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let img = image::load_from_memory(&bytes).map_err(|e| ImageError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(ImageError::Decode {
                path: path.to_path_buf(),
                reason: "image has no pixels".to_string(),
            });
        }

        Ok(Self::from_image(&img, input))
    }

    pub fn from_image(img: &DynamicImage, input: &InputConfig) -> Self {
        let (image_w, image_h) = img.dimensions();
        let scale = compute_scale(image_h, image_w, input.test_scale, input.max_size);

        let width = ((image_w as f32 * scale).round() as u32).max(1);
        let height = ((image_h as f32 * scale).round() as u32).max(1);

        Self {
            image_h,
            image_w,
            height,
            width,
            scale,
            source: img.to_rgb8(),
            pixel_mean: input.pixel_mean,
            data: OnceLock::new(),
        }
    }

    /// The `3 x height x width` input tensor, built on first access.
    pub fn data(&self) -> &[f32] {
        self.data.get_or_init(|| self.render())
    }

    /// Whether [`ImageBlob::data`] has been built yet.
    pub fn is_rendered(&self) -> bool {
        self.data.get().is_some()
    }

    fn render(&self) -> Vec<f32> {
        let (width, height) = (self.width, self.height);
        let resized;
        let pixels = if (width, height) == (self.image_w, self.image_h) {
            &self.source
        } else {
            resized = image::imageops::resize(&self.source, width, height, FilterType::Triangle);
            &resized
        };

        let plane = (width * height) as usize;
        let mut data = vec![0f32; plane * 3];
        for (x, y, pixel) in pixels.enumerate_pixels() {
            let offset = (y * width + x) as usize;
            // BGR channel order
            for c in 0..3 {
                data[c * plane + offset] = pixel[2 - c] as f32 - self.pixel_mean[c];
            }
        }
        data
    }
}

/// Scale that brings the shorter side to `test_scale` unless that would push
/// the longer side past `max_size`.
pub fn compute_scale(height: u32, width: u32, test_scale: u32, max_size: u32) -> f32 {
    let size_min = height.min(width) as f32;
    let size_max = height.max(width) as f32;

    let scale = test_scale as f32 / size_min;
    if (scale * size_max).round() > max_size as f32 {
        max_size as f32 / size_max
    } else {
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_compute_scale_short_side() {
        // 300x400 -> short side 300 to 600
        let scale = compute_scale(300, 400, 600, 1000);
        assert!((scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_compute_scale_capped_by_long_side() {
        // 100x500: 600/100 = 6 -> long side 3000 > 1000, cap to 1000/500
        let scale = compute_scale(100, 500, 600, 1000);
        assert!((scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_image_layout_and_mean() {
        let mut img = RgbImage::new(6, 3);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([10, 20, 30]);
        }
        let input = InputConfig {
            test_scale: 3,
            max_size: 100,
            pixel_mean: [1.0, 2.0, 3.0],
        };

        let blob = ImageBlob::from_image(&DynamicImage::ImageRgb8(img), &input);
        assert_eq!((blob.image_w, blob.image_h), (6, 3));
        assert_eq!((blob.width, blob.height), (6, 3));
        assert!(!blob.is_rendered());

        let data = blob.data();
        assert_eq!(data.len(), 3 * 6 * 3);
        assert!(blob.is_rendered());

        let plane = 18;
        // B plane first
        assert_eq!(data[0], 30.0 - 1.0);
        assert_eq!(data[plane], 20.0 - 2.0);
        assert_eq!(data[2 * plane], 10.0 - 3.0);
    }

    #[test]
    fn test_load_resizes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small.png");
        RgbImage::new(40, 20).save(&path).unwrap();

        let input = InputConfig {
            test_scale: 60,
            max_size: 1000,
            pixel_mean: [0.0; 3],
        };
        let blob = ImageBlob::load(&path, &input).unwrap();
        assert_eq!((blob.width, blob.height), (120, 60));
        assert!((blob.scale - 3.0).abs() < 1e-6);
        assert!(!blob.is_rendered());
        assert_eq!(blob.data().len(), 3 * 120 * 60);
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let result = ImageBlob::load(&path, &InputConfig::default());
        assert!(matches!(result, Err(ImageError::Decode { .. })));
    }
}
