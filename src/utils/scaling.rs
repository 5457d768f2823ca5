//! Mapping between original-image space and a bounded processing resolution
//!
//! Downscaling uses area averaging, upscaling back uses Lanczos3 for photographs
//! and nearest-neighbour for masks so they stay binary.

use crate::{
    error::{Result, ShowroomError},
    types::{ClickPoint, ProcessingFrame},
};
use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use tracing::debug;

/// Rescales images and click coordinates between original and processing space
pub struct CoordinateMapper;

impl CoordinateMapper {
    /// Scale factor that bounds `max(width, height)` by `max_dim`; 1.0 when already small enough
    #[must_use]
    pub fn scale_for(width: u32, height: u32, max_dim: u32) -> f64 {
        let longest = width.max(height);
        if longest <= max_dim || longest == 0 {
            return 1.0;
        }
        f64::from(max_dim) / f64::from(longest)
    }

    /// Multiply `value` by `max_dim / longest` and truncate, in exact integer arithmetic
    fn scale_length(value: u32, max_dim: u32, longest: u32) -> u32 {
        (u64::from(value) * u64::from(max_dim) / u64::from(longest.max(1))) as u32
    }

    /// Dimensions after bounding to `max_dim`, truncated and never below 1
    #[must_use]
    pub fn scaled_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
        let longest = width.max(height);
        if longest <= max_dim {
            return (width, height);
        }
        (
            Self::scale_length(width, max_dim, longest).max(1),
            Self::scale_length(height, max_dim, longest).max(1),
        )
    }

    /// Bound `image` to `max_dim` and map `point` into the resized frame
    ///
    /// The point must lie inside the original image. When no resize is needed the
    /// frame holds an untouched copy and `scale` is exactly 1.0.
    pub fn to_processing(
        image: &RgbImage,
        point: ClickPoint,
        max_dim: u32,
    ) -> Result<ProcessingFrame> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ShowroomError::invalid_input("image has no pixels"));
        }
        if max_dim == 0 {
            return Err(ShowroomError::config_value_error("max_dim", 0, ">= 1"));
        }
        point.ensure_within(width, height)?;

        let scale = Self::scale_for(width, height, max_dim);
        if (scale - 1.0).abs() < f64::EPSILON {
            return Ok(ProcessingFrame {
                image: image.clone(),
                scale: 1.0,
                point,
                original_dimensions: (width, height),
            });
        }

        let longest = width.max(height);
        let (new_width, new_height) = Self::scaled_dimensions(width, height, max_dim);
        let resized = imageops::thumbnail(image, new_width, new_height);
        let scaled_point = ClickPoint::new(
            Self::scale_length(point.x, max_dim, longest),
            Self::scale_length(point.y, max_dim, longest),
        )
        .clamped(new_width, new_height);

        debug!(
            from = format!("{}x{}", width, height),
            to = format!("{}x{}", new_width, new_height),
            scale,
            "Downscaled frame for processing"
        );

        Ok(ProcessingFrame {
            image: resized,
            scale,
            point: scaled_point,
            original_dimensions: (width, height),
        })
    }

    /// Downscale an image for analysis without a click point; returns the image and its scale
    #[must_use]
    pub fn bound_image(image: &RgbImage, max_dim: u32) -> (RgbImage, f64) {
        let (width, height) = image.dimensions();
        let scale = Self::scale_for(width, height, max_dim.max(1));
        if (scale - 1.0).abs() < f64::EPSILON {
            return (image.clone(), 1.0);
        }
        let (new_width, new_height) = Self::scaled_dimensions(width, height, max_dim.max(1));
        (imageops::thumbnail(image, new_width, new_height), scale)
    }

    /// Resize a processing-space photograph back to `width` x `height` with Lanczos3
    #[must_use]
    pub fn to_original(image: &RgbImage, width: u32, height: u32) -> RgbImage {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        imageops::resize(image, width, height, FilterType::Lanczos3)
    }

    /// Resize a mask with nearest-neighbour sampling so values stay binary
    #[must_use]
    pub fn mask_to_original(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
        if mask.dimensions() == (width, height) {
            return mask.clone();
        }
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_small_images_are_untouched() {
        let image = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        let frame = CoordinateMapper::to_processing(&image, ClickPoint::new(5, 7), 2048).unwrap();
        assert_eq!(frame.scale, 1.0);
        assert_eq!(frame.point, ClickPoint::new(5, 7));
        assert_eq!(frame.image, image);
        assert!(!frame.is_scaled());
    }

    #[test]
    fn test_wide_panorama_scales_by_longest_side() {
        let image = RgbImage::new(4000, 2000);
        let frame =
            CoordinateMapper::to_processing(&image, ClickPoint::new(2000, 1000), 2048).unwrap();
        assert!((frame.scale - 0.512).abs() < 1e-9);
        assert_eq!(frame.dimensions(), (2048, 1024));
        assert_eq!(frame.point, ClickPoint::new(1024, 512));
    }

    #[test]
    fn test_tall_image_uses_height() {
        let image = RgbImage::new(1000, 3000);
        let frame = CoordinateMapper::to_processing(&image, ClickPoint::new(999, 2999), 1500).unwrap();
        assert_eq!(frame.dimensions(), (500, 1500));
        assert!(frame.point.x < 500 && frame.point.y < 1500);
    }

    #[test]
    fn test_point_outside_image_is_rejected() {
        let image = RgbImage::new(100, 100);
        let err = CoordinateMapper::to_processing(&image, ClickPoint::new(100, 5), 50).unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_point_round_trip_within_one_processing_pixel() {
        let image = RgbImage::new(3001, 1999);
        for (x, y) in [(0, 0), (1500, 1000), (3000, 1998), (17, 1203)] {
            let click = ClickPoint::new(x, y);
            let frame = CoordinateMapper::to_processing(&image, click, 1024).unwrap();
            let back = frame.point_to_original(frame.point);
            let tolerance = (1.0 / frame.scale).ceil() as i64;
            assert!((i64::from(back.x) - i64::from(x)).abs() <= tolerance);
            assert!((i64::from(back.y) - i64::from(y)).abs() <= tolerance);
        }
    }

    #[test]
    fn test_mask_upscale_stays_binary() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([255]));
        let big = CoordinateMapper::mask_to_original(&mask, 13, 11);
        assert_eq!(big.dimensions(), (13, 11));
        assert!(big.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(big.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_upscale_restores_dimensions() {
        let small = RgbImage::from_pixel(20, 10, Rgb([200, 100, 50]));
        let big = CoordinateMapper::to_original(&small, 41, 21);
        assert_eq!(big.dimensions(), (41, 21));
    }
}
