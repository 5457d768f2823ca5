//! Request-scoped data model shared by the pipeline stages

use crate::{
    config::FloorOutputMode,
    error::{Result, ShowroomError},
};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Pixel coordinate supplied by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPoint {
    pub x: u32,
    pub y: u32,
}

impl ClickPoint {
    #[must_use]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Build a point from signed form values, rejecting anything outside the image
    pub fn from_signed(x: i64, y: i64, width: u32, height: u32) -> Result<Self> {
        let x = u32::try_from(x)
            .map_err(|_| ShowroomError::invalid_input(format!("x coordinate {x} is negative or too large")))?;
        let y = u32::try_from(y)
            .map_err(|_| ShowroomError::invalid_input(format!("y coordinate {y} is negative or too large")))?;
        let point = Self::new(x, y);
        point.ensure_within(width, height)?;
        Ok(point)
    }

    /// Check `0 <= x < width` and `0 <= y < height`
    pub fn ensure_within(&self, width: u32, height: u32) -> Result<()> {
        if self.x >= width || self.y >= height {
            return Err(ShowroomError::invalid_input(format!(
                "click ({}, {}) lies outside the {}x{} image",
                self.x, self.y, width, height
            )));
        }
        Ok(())
    }

    /// Clamp into `[0, width-1] x [0, height-1]`
    #[must_use]
    pub fn clamped(self, width: u32, height: u32) -> Self {
        Self {
            x: self.x.min(width.saturating_sub(1)),
            y: self.y.min(height.saturating_sub(1)),
        }
    }
}

/// A copy of the input bounded to a maximum dimension, with the data needed to map back
#[derive(Debug, Clone)]
pub struct ProcessingFrame {
    /// Resized (or untouched) pixels
    pub image: RgbImage,
    /// `processing / original`; exactly 1.0 when no resize happened
    pub scale: f64,
    /// Click in processing space
    pub point: ClickPoint,
    /// Dimensions of the source image
    pub original_dimensions: (u32, u32),
}

impl ProcessingFrame {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn is_scaled(&self) -> bool {
        self.dimensions() != self.original_dimensions
    }

    /// Map a processing-space point back to original space (pixel-centre mapping)
    #[must_use]
    pub fn point_to_original(&self, point: ClickPoint) -> ClickPoint {
        if !self.is_scaled() {
            return point;
        }
        let (width, height) = self.original_dimensions;
        let map = |v: u32| ((f64::from(v) + 0.5) / self.scale - 0.5).round().max(0.0) as u32;
        ClickPoint::new(map(point.x), map(point.y)).clamped(width, height)
    }
}

/// The three hypotheses a promptable segmentation model returns for one click
#[derive(Debug, Clone)]
pub struct CandidateMaskSet {
    masks: [GrayImage; 3],
}

impl CandidateMaskSet {
    /// Wrap three rasters (non-zero = selected); all must share one shape
    pub fn new(masks: [GrayImage; 3]) -> Result<Self> {
        let dims = masks[0].dimensions();
        if masks.iter().any(|m| m.dimensions() != dims) {
            return Err(ShowroomError::segmentation(
                "candidate masks do not share one shape",
            ));
        }
        Ok(Self { masks })
    }

    /// Build from boolean rasters in row-major order
    pub fn from_bools(width: u32, height: u32, masks: [Vec<bool>; 3]) -> Result<Self> {
        let expected = width as usize * height as usize;
        let [a, b, c] = masks;
        let to_image = |bits: Vec<bool>| -> Result<GrayImage> {
            if bits.len() != expected {
                return Err(ShowroomError::segmentation(format!(
                    "candidate mask has {} pixels, expected {}",
                    bits.len(),
                    expected
                )));
            }
            let raw = bits.into_iter().map(|b| if b { 255 } else { 0 }).collect();
            GrayImage::from_raw(width, height, raw)
                .ok_or_else(|| ShowroomError::segmentation("candidate mask buffer size mismatch"))
        };
        Self::new([to_image(a)?, to_image(b)?, to_image(c)?])
    }

    #[must_use]
    pub fn masks(&self) -> &[GrayImage; 3] {
        &self.masks
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.masks[0].dimensions()
    }
}

/// Single dilated 0/255 raster in processing space
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingMask(GrayImage);

impl WorkingMask {
    /// Wrap a raster, snapping every non-zero value to 255
    #[must_use]
    pub fn from_image(mut image: GrayImage) -> Self {
        for p in image.pixels_mut() {
            if p.0[0] > 0 {
                p.0[0] = 255;
            }
        }
        Self(image)
    }

    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.0
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel_checked(x, y).is_some_and(|p| p.0[0] > 0)
    }

    #[must_use]
    pub fn selected_pixels(&self) -> usize {
        self.0.as_raw().iter().filter(|&&v| v > 0).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected_pixels() == 0
    }

    /// Fraction of pixels selected
    #[must_use]
    pub fn coverage(&self) -> f64 {
        let total = self.0.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        self.selected_pixels() as f64 / total as f64
    }
}

/// Replacement pixels returned by the generative service
#[derive(Debug, Clone)]
pub struct GeneratedPatch {
    pub image: RgbImage,
    /// Number of generation attempts it took to obtain this patch
    pub attempts: u32,
}

/// Wall-clock time spent per stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingTimings {
    pub segmentation_ms: u64,
    pub inpaint_ms: u64,
    pub composite_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.segmentation_ms + self.inpaint_ms + self.composite_ms
    }
}

/// Final image at the resolution of the original upload
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub image: RgbImage,
    /// Processing-space mask that drove the edit
    pub mask: WorkingMask,
    pub scale: f64,
    pub timings: ProcessingTimings,
}

impl CompositeResult {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Per-pixel class indices produced by a semantic segmentation model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    width: u32,
    height: u32,
    labels: Vec<u16>,
}

impl ClassMap {
    pub fn new(width: u32, height: u32, labels: Vec<u16>) -> Result<Self> {
        if labels.len() != width as usize * height as usize {
            return Err(ShowroomError::segmentation(format!(
                "class map has {} labels for a {}x{} grid",
                labels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    /// Zero-sized map
    #[must_use]
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn labels(&self) -> &[u16] {
        &self.labels
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.labels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Nearest-neighbour resample to a new grid
    #[must_use]
    pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let mut labels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let sy = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as u32;
            for x in 0..width {
                let sx = (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as u32;
                labels.push(self.get(sx, sy).unwrap_or(0));
            }
        }
        Self {
            width,
            height,
            labels,
        }
    }
}

/// Vertex of a floor boundary in original-image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorPoint {
    pub x: i32,
    pub y: i32,
}

/// Presentations of one detected floor mask
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FloorProduct {
    /// Translucent overlay as a PNG data URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_image: Option<String>,
    /// Simplified outer contour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor_boundary: Option<Vec<FloorPoint>>,
}

/// Result of floor detection; degraded variants stay distinguishable from success
#[derive(Debug, Clone, PartialEq)]
pub enum FloorOutcome {
    Detected(FloorProduct),
    /// Detector ran but found no usable floor region
    NotFound,
    /// Detector failed; the reason is kept for logging
    Failed(String),
}

impl FloorOutcome {
    #[must_use]
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }

    #[must_use]
    pub fn product(&self) -> Option<&FloorProduct> {
        match self {
            Self::Detected(product) => Some(product),
            Self::NotFound | Self::Failed(_) => None,
        }
    }

    /// Overlay data URI, or an empty string when degraded
    #[must_use]
    pub fn mask_image(&self) -> String {
        self.product()
            .and_then(|p| p.mask_image.clone())
            .unwrap_or_default()
    }

    /// Boundary polygon, or an empty list when degraded
    #[must_use]
    pub fn floor_boundary(&self) -> Vec<FloorPoint> {
        self.product()
            .and_then(|p| p.floor_boundary.clone())
            .unwrap_or_default()
    }

    /// Response fields for `mode`; degraded outcomes fill them with empty values
    #[must_use]
    pub fn presentation(&self, mode: FloorOutputMode) -> FloorProduct {
        FloorProduct {
            mask_image: mode.wants_overlay().then(|| self.mask_image()),
            floor_boundary: mode.wants_polygon().then(|| self.floor_boundary()),
        }
    }
}
