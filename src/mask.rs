//! Candidate-mask union and dilation

use crate::{
    config::RemovalConfig,
    types::{CandidateMaskSet, WorkingMask},
};
use image::GrayImage;
use imageproc::{distance_transform::Norm, morphology};
use tracing::{debug, instrument};

/// Turns the three segmentation hypotheses into one dilated working mask
#[derive(Debug, Clone, Copy)]
pub struct MaskBuilder {
    kernel: u32,
    iterations: u32,
}

impl Default for MaskBuilder {
    fn default() -> Self {
        Self::new(10, 3)
    }
}

impl MaskBuilder {
    /// `kernel` is the side of a square structuring element applied `iterations` times
    #[must_use]
    pub fn new(kernel: u32, iterations: u32) -> Self {
        Self { kernel, iterations }
    }

    #[must_use]
    pub fn from_config(config: &RemovalConfig) -> Self {
        Self::new(config.dilation_kernel, config.dilation_iterations)
    }

    /// Chessboard radius of the combined dilation
    ///
    /// A square kernel of side `k` reaches `k / 2` pixels from its anchor, and
    /// repeated square dilations compose additively. The growth is the same on all
    /// four sides. An even kernel anchored at `k / 2` reaches one pixel less per
    /// iteration on two sides, so its footprint is contained in this one.
    #[must_use]
    pub fn growth_radius(&self) -> u32 {
        (self.kernel / 2).saturating_mul(self.iterations)
    }

    /// Logical OR of all candidates as a 0/255 raster
    #[must_use]
    pub fn union(candidates: &CandidateMaskSet) -> GrayImage {
        let (width, height) = candidates.dimensions();
        let mut union = GrayImage::new(width, height);
        for mask in candidates.masks() {
            for (out, src) in union.pixels_mut().zip(mask.pixels()) {
                if src.0[0] > 0 {
                    out.0[0] = 255;
                }
            }
        }
        union
    }

    /// Union the candidates and grow the result outward; never fails
    #[instrument(skip_all, fields(width = candidates.dimensions().0, height = candidates.dimensions().1))]
    pub fn build(&self, candidates: &CandidateMaskSet) -> WorkingMask {
        let union = Self::union(candidates);
        let radius = self.growth_radius();
        if radius == 0 {
            return WorkingMask::from_image(union);
        }

        let mut grown = union;
        let mut remaining = radius;
        while remaining > 0 {
            let step = remaining.min(u32::from(u8::MAX));
            grown = morphology::dilate(&grown, Norm::LInf, step as u8);
            remaining -= step;
        }

        let mask = WorkingMask::from_image(grown);
        debug!(
            radius,
            selected = mask.selected_pixels(),
            coverage = mask.coverage(),
            "Built working mask"
        );
        mask
    }
}
