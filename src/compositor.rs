//! Reconstructs the full-resolution photograph from a generated patch
//!
//! Order of operations: fit the patch to the frame, match its histograms to the
//! frame, upscale patch (Lanczos3) and mask (nearest) to the original size,
//! feather the mask with a Gaussian, then alpha-blend over the untouched original.

use crate::{
    config::RemovalConfig,
    error::{Result, ShowroomError},
    types::{CompositeResult, GeneratedPatch, ProcessingFrame, ProcessingTimings, WorkingMask},
    utils::{match_histograms, CoordinateMapper},
};
use image::{imageops, imageops::FilterType, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Per-pixel blend weights in `[0, 1]`
pub type WeightMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Color-matches, upscales, feathers and blends generated content into the original
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    feather_sigma: f32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::from_config(&RemovalConfig::default())
    }
}

impl Compositor {
    #[must_use]
    pub fn new(feather_sigma: f32) -> Self {
        Self { feather_sigma }
    }

    #[must_use]
    pub fn from_config(config: &RemovalConfig) -> Self {
        Self::new(config.feather_sigma())
    }

    /// Resize the patch to exactly the frame dimensions
    #[must_use]
    pub fn fit_patch(patch: &RgbImage, frame: &ProcessingFrame) -> RgbImage {
        let (width, height) = frame.dimensions();
        if patch.dimensions() == (width, height) {
            return patch.clone();
        }
        debug!(
            from = format!("{}x{}", patch.width(), patch.height()),
            to = format!("{}x{}", width, height),
            "Resizing generated patch to frame"
        );
        imageops::resize(patch, width, height, FilterType::Triangle)
    }

    /// Histogram-match the patch to the frame, keeping the unmatched patch on failure
    #[must_use]
    pub fn color_match(patch: RgbImage, frame: &ProcessingFrame) -> RgbImage {
        match match_histograms(&patch, &frame.image) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(error = %e, "Histogram matching failed, using unmatched patch");
                patch
            }
        }
    }

    /// Normalize a 0/255 mask to `[0, 1]` and soften its edge
    #[must_use]
    pub fn feather(&self, mask: &GrayImage) -> WeightMap {
        let (width, height) = mask.dimensions();
        let weights: WeightMap = ImageBuffer::from_fn(width, height, |x, y| {
            Luma([f32::from(mask.get_pixel(x, y).0[0]) / 255.0])
        });
        if self.feather_sigma <= 0.0 || width == 0 || height == 0 {
            return weights;
        }
        let mut blurred = imageproc::filter::gaussian_blur_f32(&weights, self.feather_sigma);
        for w in blurred.pixels_mut() {
            w.0[0] = w.0[0].clamp(0.0, 1.0);
        }
        blurred
    }

    /// `patch * w + original * (1 - w)`, rounded per channel
    pub fn blend(original: &RgbImage, patch: &RgbImage, weights: &WeightMap) -> Result<RgbImage> {
        if original.dimensions() != patch.dimensions() || original.dimensions() != weights.dimensions() {
            return Err(ShowroomError::processing_stage_error(
                "blend",
                "original, patch and weights must share dimensions",
            ));
        }
        let mut out = original.clone();
        for ((dst, src), w) in out.pixels_mut().zip(patch.pixels()).zip(weights.pixels()) {
            let w = w.0[0];
            if w <= 0.0 {
                continue;
            }
            if w >= 1.0 {
                *dst = *src;
                continue;
            }
            let mix = |p: u8, o: u8| (f32::from(p) * w + f32::from(o) * (1.0 - w)).round().clamp(0.0, 255.0) as u8;
            *dst = Rgb([
                mix(src.0[0], dst.0[0]),
                mix(src.0[1], dst.0[1]),
                mix(src.0[2], dst.0[2]),
            ]);
        }
        Ok(out)
    }

    /// Produce the final image at the original resolution
    #[instrument(skip_all, fields(
        original = format!("{}x{}", original.width(), original.height()),
        frame = format!("{}x{}", frame.image.width(), frame.image.height())
    ))]
    pub fn composite(
        &self,
        original: &RgbImage,
        frame: &ProcessingFrame,
        patch: &GeneratedPatch,
        mask: &WorkingMask,
    ) -> Result<CompositeResult> {
        let started = Instant::now();
        let (width, height) = original.dimensions();
        if (width, height) != frame.original_dimensions {
            return Err(ShowroomError::processing_stage_error(
                "composite",
                "original image does not match the frame it was scaled from",
            ));
        }
        if mask.dimensions() != frame.dimensions() {
            return Err(ShowroomError::processing_stage_error(
                "composite",
                "mask does not match the processing frame",
            ));
        }

        let image = if mask.is_empty() {
            debug!("Empty mask, returning original pixels");
            original.clone()
        } else {
            let fitted = Self::fit_patch(&patch.image, frame);
            let matched = Self::color_match(fitted, frame);
            let upscaled = CoordinateMapper::to_original(&matched, width, height);
            let mask_full = CoordinateMapper::mask_to_original(mask.as_image(), width, height);
            let weights = self.feather(&mask_full);
            Self::blend(original, &upscaled, &weights)?
        };

        let composite_ms = started.elapsed().as_millis() as u64;
        debug!(composite_ms, "Composited generated patch");
        Ok(CompositeResult {
            image,
            mask: mask.clone(),
            scale: frame.scale,
            timings: ProcessingTimings {
                composite_ms,
                ..ProcessingTimings::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClickPoint;

    fn frame_of(image: RgbImage, original: (u32, u32)) -> ProcessingFrame {
        let scale = f64::from(image.width()) / f64::from(original.0);
        ProcessingFrame {
            image,
            scale,
            point: ClickPoint::new(0, 0),
            original_dimensions: original,
        }
    }

    fn centre_mask(width: u32, height: u32, half: u32) -> WorkingMask {
        WorkingMask::from_image(GrayImage::from_fn(width, height, |x, y| {
            let inside = x.abs_diff(width / 2) <= half && y.abs_diff(height / 2) <= half;
            Luma([if inside { 255 } else { 0 }])
        }))
    }

    #[test]
    fn test_blend_extremes() {
        let original = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        let patch = RgbImage::from_pixel(2, 1, Rgb([200, 100, 50]));
        let weights = WeightMap::from_raw(2, 1, vec![0.0, 1.0]).unwrap();
        let out = Compositor::blend(&original, &patch, &weights).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([200, 100, 50]));

        let half = WeightMap::from_raw(2, 1, vec![0.5, 0.5]).unwrap();
        let out = Compositor::blend(&original, &patch, &half).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 50, 25]));
    }

    #[test]
    fn test_feather_softens_edges() {
        let mask = centre_mask(64, 64, 12).into_image();
        let weights = Compositor::default().feather(&mask);
        assert!(weights.get_pixel(0, 0).0[0] < 1e-6);
        assert!(weights.get_pixel(32, 32).0[0] > 0.999);
        let edge = weights.get_pixel(32 + 12, 32).0[0];
        assert!(edge > 0.2 && edge < 0.8);
    }

    #[test]
    fn test_composite_restores_original_resolution() {
        let original = RgbImage::from_pixel(200, 100, Rgb([50, 60, 70]));
        let frame = frame_of(RgbImage::from_pixel(100, 50, Rgb([50, 60, 70])), (200, 100));
        let patch = GeneratedPatch {
            image: RgbImage::from_pixel(96, 48, Rgb([50, 60, 70])),
            attempts: 1,
        };
        let result = Compositor::default()
            .composite(&original, &frame, &patch, &centre_mask(100, 50, 5))
            .unwrap();
        assert_eq!(result.dimensions(), (200, 100));
        assert!((result.scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_far_pixels_are_untouched() {
        let original = RgbImage::from_fn(120, 80, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 77]));
        let frame = frame_of(original.clone(), (120, 80));
        let patch = GeneratedPatch {
            image: RgbImage::from_pixel(120, 80, Rgb([255, 0, 255])),
            attempts: 1,
        };
        let mask = centre_mask(120, 80, 6);
        let result = Compositor::default()
            .composite(&original, &frame, &patch, &mask)
            .unwrap();
        assert_eq!(result.image.get_pixel(0, 0), original.get_pixel(0, 0));
        assert_eq!(result.image.get_pixel(119, 79), original.get_pixel(119, 79));
        assert_ne!(result.image.get_pixel(60, 40), original.get_pixel(60, 40));
    }

    #[test]
    fn test_empty_mask_returns_original() {
        let original = RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]));
        let frame = frame_of(original.clone(), (10, 10));
        let patch = GeneratedPatch {
            image: RgbImage::from_pixel(10, 10, Rgb([200, 200, 200])),
            attempts: 1,
        };
        let mask = WorkingMask::from_image(GrayImage::new(10, 10));
        let result = Compositor::default()
            .composite(&original, &frame, &patch, &mask)
            .unwrap();
        assert_eq!(result.image, original);
    }

    #[test]
    fn test_mismatched_inputs_are_rejected() {
        let original = RgbImage::new(10, 10);
        let frame = frame_of(RgbImage::new(10, 10), (10, 10));
        let patch = GeneratedPatch {
            image: RgbImage::new(10, 10),
            attempts: 1,
        };
        let mask = WorkingMask::from_image(GrayImage::new(5, 5));
        assert!(Compositor::default()
            .composite(&original, &frame, &patch, &mask)
            .is_err());
    }
}
