//! Floor detection on top of a semantic segmentation backend

use crate::{
    config::{FloorConfig, FloorOutputMode},
    error::{Result, ShowroomError},
    inference::SemanticSegmenter,
    services::ImageIOService,
    types::{FloorOutcome, FloorPoint, FloorProduct},
    utils::CoordinateMapper,
};
use image::{imageops, imageops::FilterType, GrayImage, Luma, Rgba, RgbImage, RgbaImage};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    distance_transform::Norm,
    drawing::draw_polygon_mut,
    geometry::{approximate_polygon_dp, arc_length},
    morphology,
    point::Point,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Floor mask in analysis space, before any presentation is rendered
#[derive(Debug, Clone)]
pub struct FloorMask {
    /// 0/255 raster at the bounded analysis size
    pub mask: GrayImage,
    /// `analysis / original`
    pub scale: f64,
    pub original_dimensions: (u32, u32),
}

impl FloorMask {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.as_raw().iter().all(|&v| v == 0)
    }
}

/// Unions floor-like classes, absorbs furniture islands and renders overlay/polygon products
pub struct FloorDetector {
    segmenter: Arc<dyn SemanticSegmenter>,
    config: FloorConfig,
    analysis_max_dim: u32,
}

impl FloorDetector {
    pub fn new(segmenter: Arc<dyn SemanticSegmenter>, config: FloorConfig, analysis_max_dim: u32) -> Self {
        Self {
            segmenter,
            config,
            analysis_max_dim,
        }
    }

    #[must_use]
    pub fn output_mode(&self) -> FloorOutputMode {
        self.config.output_mode
    }

    /// Detect the floor; failures and empty results come back as degraded outcomes
    #[instrument(skip_all, fields(width = image.width(), height = image.height(), mode = ?self.config.output_mode))]
    pub fn detect(&self, image: &RgbImage) -> FloorOutcome {
        let floor = match self.floor_mask(image) {
            Ok(floor) => floor,
            Err(e) => {
                warn!(error = %e, "Floor detection failed");
                return FloorOutcome::Failed(e.to_string());
            }
        };
        if floor.is_empty() {
            info!("No floor region detected");
            return FloorOutcome::NotFound;
        }
        match self.render(&floor) {
            Ok(Some(product)) => FloorOutcome::Detected(product),
            Ok(None) => {
                info!("Floor mask produced no usable contour");
                FloorOutcome::NotFound
            }
            Err(e) => {
                warn!(error = %e, "Rendering floor products failed");
                FloorOutcome::Failed(e.to_string())
            }
        }
    }

    /// Classify, union floor classes, force the bottom band, close gaps and fill holes
    pub fn floor_mask(&self, image: &RgbImage) -> Result<FloorMask> {
        let original_dimensions = image.dimensions();
        if original_dimensions.0 == 0 || original_dimensions.1 == 0 {
            return Err(ShowroomError::invalid_input("image has no pixels"));
        }
        let (small, scale) = CoordinateMapper::bound_image(image, self.analysis_max_dim);
        let (width, height) = small.dimensions();

        let classes = self.segmenter.classify(&small)?;
        if classes.dimensions().0 == 0 || classes.dimensions().1 == 0 {
            return Err(ShowroomError::segmentation("classifier returned an empty class map"));
        }
        let classes = classes.resize_nearest(width, height);

        let mut mask = GrayImage::from_fn(width, height, |x, y| {
            let is_floor = classes
                .get(x, y)
                .is_some_and(|c| self.config.classes.contains(&c));
            Luma([if is_floor { 255 } else { 0 }])
        });

        let band_start = self.bottom_band_start(height);
        for y in band_start..height {
            for x in 0..width {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let radius = (self.config.closing_kernel / 2).min(u32::from(u8::MAX)) as u8;
        if radius > 0 {
            mask = morphology::close(&mask, Norm::LInf, radius);
        }
        let mask = fill_holes(&mask);

        debug!(
            analysis = format!("{}x{}", width, height),
            band_start,
            "Built floor mask"
        );
        Ok(FloorMask {
            mask,
            scale,
            original_dimensions,
        })
    }

    /// First row of the band that is always floor
    #[must_use]
    pub fn bottom_band_start(&self, height: u32) -> u32 {
        let keep = (1.0 - self.config.force_bottom_fraction).clamp(0.0, 1.0);
        ((f64::from(height) * keep) as u32).min(height)
    }

    fn render(&self, floor: &FloorMask) -> Result<Option<FloorProduct>> {
        let mode = self.config.output_mode;
        let mut product = FloorProduct::default();

        if mode.wants_polygon() {
            match self.boundary(floor) {
                Some(points) => product.floor_boundary = Some(points),
                None if mode == FloorOutputMode::Polygon => return Ok(None),
                None => product.floor_boundary = Some(Vec::new()),
            }
        }
        if mode.wants_overlay() {
            product.mask_image = Some(ImageIOService::png_data_uri(&self.overlay(floor))?);
        }
        Ok(Some(product))
    }

    /// Translucent overlay at the original resolution
    #[must_use]
    pub fn overlay(&self, floor: &FloorMask) -> RgbaImage {
        let (width, height) = floor.mask.dimensions();
        let color = Rgba(self.config.overlay_color);
        let small = RgbaImage::from_fn(width, height, |x, y| {
            if floor.mask.get_pixel(x, y).0[0] > 0 {
                color
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let (ow, oh) = floor.original_dimensions;
        if (ow, oh) == (width, height) {
            return small;
        }
        imageops::resize(&small, ow, oh, FilterType::Nearest)
    }

    /// Simplified outline of the largest floor region, in original coordinates
    #[must_use]
    pub fn boundary(&self, floor: &FloorMask) -> Option<Vec<FloorPoint>> {
        let largest = outer_contours(&floor.mask)
            .into_iter()
            .max_by(|a, b| polygon_area(a).total_cmp(&polygon_area(b)))?;

        let epsilon = self.config.polygon_epsilon_fraction * arc_length(&largest, true);
        let simplified = approximate_polygon_dp(&largest, epsilon, true);
        if simplified.is_empty() {
            return None;
        }

        let scale = if floor.scale > 0.0 { floor.scale } else { 1.0 };
        Some(
            simplified
                .iter()
                .map(|p| FloorPoint {
                    x: (f64::from(p.x) / scale) as i32,
                    y: (f64::from(p.y) / scale) as i32,
                })
                .collect(),
        )
    }
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let Some(last) = points.last() else {
        return 0.0;
    };
    let mut previous = *last;
    let mut twice_area = 0.0;
    for point in points {
        twice_area += f64::from(previous.x) * f64::from(point.y) - f64::from(point.x) * f64::from(previous.y);
        previous = *point;
    }
    twice_area.abs() / 2.0
}

/// Outer contours of the foreground, including regions that touch the image edge
///
/// Pixels outside the image count as background: the mask is traced with a one
/// pixel zero border and the points are shifted back into image coordinates.
fn outer_contours(mask: &GrayImage) -> Vec<Vec<Point<i32>>> {
    let (width, height) = mask.dimensions();
    let mut padded = GrayImage::new(width + 2, height + 2);
    imageops::replace(&mut padded, mask, 1, 1);

    let contours: Vec<Contour<i32>> = find_contours(&padded);
    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            c.points
                .into_iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect()
        })
        .collect()
}

/// Fill every region enclosed by an outer contour
fn fill_holes(mask: &GrayImage) -> GrayImage {
    let mut filled = mask.clone();
    for mut polygon in outer_contours(mask) {
        polygon.dedup();
        while polygon.len() > 1 && polygon.first() == polygon.last() {
            polygon.pop();
        }
        // Polygon drawing needs at least a triangle; smaller regions are already set
        if polygon.len() < 3 {
            continue;
        }
        draw_polygon_mut(&mut filled, &polygon, Luma([255]));
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backends::test_utils::MockSemanticSegmenter, types::ClassMap};

    fn detector(segmenter: MockSemanticSegmenter, mode: FloorOutputMode) -> FloorDetector {
        let config = FloorConfig {
            output_mode: mode,
            closing_kernel: 6,
            ..FloorConfig::default()
        };
        FloorDetector::new(Arc::new(segmenter), config, 800)
    }

    #[test]
    fn test_bottom_band_is_forced_even_without_floor() {
        let segmenter = MockSemanticSegmenter::uniform(100, 100, 0).unwrap();
        let detector = detector(segmenter, FloorOutputMode::Overlay);
        let floor = detector.floor_mask(&RgbImage::new(100, 100)).unwrap();
        let start = detector.bottom_band_start(100);
        assert_eq!(start, 95);
        for y in start..100 {
            for x in 0..100 {
                assert_eq!(floor.mask.get_pixel(x, y).0[0], 255);
            }
        }
        assert_eq!(floor.mask.get_pixel(50, 10).0[0], 0);
    }

    #[test]
    fn test_floor_classes_are_unioned() {
        let labels: Vec<u16> = (0..40u32)
            .flat_map(|y| (0..40u32).map(move |x| if y < 20 { 0 } else if x < 20 { 3 } else { 29 }))
            .collect();
        let segmenter = MockSemanticSegmenter::new(ClassMap::new(40, 40, labels).unwrap());
        let detector = detector(segmenter, FloorOutputMode::Overlay);
        let floor = detector.floor_mask(&RgbImage::new(40, 40)).unwrap();
        assert_eq!(floor.mask.get_pixel(5, 30).0[0], 255);
        assert_eq!(floor.mask.get_pixel(35, 30).0[0], 255);
        assert_eq!(floor.mask.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn test_islands_inside_floor_are_filled() {
        let labels: Vec<u16> = (0..60u32)
            .flat_map(|y| {
                (0..60u32).map(move |x| {
                    let island = (38..48).contains(&x) && (38..48).contains(&y);
                    if y >= 30 && !island { 3 } else { 0 }
                })
            })
            .collect();
        let segmenter = MockSemanticSegmenter::new(ClassMap::new(60, 60, labels).unwrap());
        let floor = detector(segmenter, FloorOutputMode::Overlay)
            .floor_mask(&RgbImage::new(60, 60))
            .unwrap();
        assert_eq!(floor.mask.get_pixel(42, 42).0[0], 255);
    }

    /// Full-width floor touching the left, right and bottom edges around a large sofa
    fn room_with_sofa(mode: FloorOutputMode) -> FloorDetector {
        let labels: Vec<u16> = (0..200u32)
            .flat_map(|y| {
                (0..400u32).map(move |x| {
                    let sofa = (150..250).contains(&x) && (80..150).contains(&y);
                    if y >= 40 && !sofa { 3 } else { 0 }
                })
            })
            .collect();
        let segmenter = MockSemanticSegmenter::new(ClassMap::new(400, 200, labels).unwrap());
        let config = FloorConfig {
            output_mode: mode,
            ..FloorConfig::default()
        };
        FloorDetector::new(Arc::new(segmenter), config, 800)
    }

    #[test]
    fn test_edge_touching_floor_fills_large_islands() {
        let detector = room_with_sofa(FloorOutputMode::Overlay);
        let floor = detector.floor_mask(&RgbImage::new(400, 200)).unwrap();
        for (x, y) in [(200, 115), (151, 81), (248, 148)] {
            assert_eq!(floor.mask.get_pixel(x, y).0[0], 255, "sofa pixel ({x}, {y})");
        }
        assert_eq!(floor.mask.get_pixel(200, 10).0[0], 0);
    }

    #[test]
    fn test_edge_touching_floor_has_boundary() {
        let outcome = room_with_sofa(FloorOutputMode::Polygon).detect(&RgbImage::new(400, 200));
        let boundary = outcome.floor_boundary();
        assert!(outcome.is_detected());
        assert!(boundary.len() >= 4);
        assert!(boundary.iter().all(|p| (0..400).contains(&p.x) && (0..200).contains(&p.y)));
        assert!(boundary.contains(&FloorPoint { x: 0, y: 199 }));
        assert!(boundary.contains(&FloorPoint { x: 399, y: 199 }));
        assert!(boundary.iter().all(|p| p.y >= 40));

        let both = room_with_sofa(FloorOutputMode::Both).detect(&RgbImage::new(400, 200));
        let product = both.product().unwrap();
        assert!(product.mask_image.as_deref().is_some_and(|uri| !uri.is_empty()));
        assert!(product.floor_boundary.as_ref().is_some_and(|b| !b.is_empty()));
    }

    #[test]
    fn test_overlay_is_png_at_original_size() {
        let segmenter = MockSemanticSegmenter::floor_below(10, 10, 5, 3).unwrap();
        let config = FloorConfig {
            closing_kernel: 6,
            ..FloorConfig::default()
        };
        let detector = FloorDetector::new(Arc::new(segmenter), config, 50);
        let outcome = detector.detect(&RgbImage::new(200, 100));
        let uri = outcome.mask_image();
        assert!(uri.starts_with("data:image/png;base64,"));

        let bytes = ImageIOService::decode_data_uri(&uri).unwrap();
        let overlay = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(overlay.dimensions(), (200, 100));
        assert_eq!(overlay.get_pixel(100, 99), &Rgba([0, 255, 0, 200]));
        assert_eq!(overlay.get_pixel(100, 0).0[3], 0);
    }

    #[test]
    fn test_polygon_is_rescaled_to_original() {
        let segmenter = MockSemanticSegmenter::floor_below(50, 25, 15, 9).unwrap();
        let detector = FloorDetector::new(
            Arc::new(segmenter),
            FloorConfig {
                output_mode: FloorOutputMode::Polygon,
                closing_kernel: 6,
                ..FloorConfig::default()
            },
            50,
        );
        let outcome = detector.detect(&RgbImage::new(200, 100));
        let boundary = outcome.floor_boundary();
        assert!(boundary.len() >= 3);
        assert!(boundary.iter().all(|p| (0..200).contains(&p.x) && (0..100).contains(&p.y)));
        assert!(boundary.iter().any(|p| p.x > 150));
        assert!(outcome.product().unwrap().mask_image.is_none());
    }

    #[test]
    fn test_both_mode_returns_both_products() {
        let segmenter = MockSemanticSegmenter::floor_below(20, 20, 10, 3).unwrap();
        let outcome = detector(segmenter, FloorOutputMode::Both).detect(&RgbImage::new(20, 20));
        let product = outcome.product().unwrap();
        assert!(product.mask_image.is_some());
        assert!(product.floor_boundary.is_some());
    }

    #[test]
    fn test_classifier_failure_is_degraded() {
        let outcome = detector(MockSemanticSegmenter::new_failing(), FloorOutputMode::Overlay)
            .detect(&RgbImage::new(10, 10));
        assert!(matches!(outcome, FloorOutcome::Failed(_)));
        assert_eq!(outcome.mask_image(), "");
    }

    #[test]
    fn test_zero_band_and_no_floor_is_not_found() {
        let segmenter = MockSemanticSegmenter::uniform(10, 10, 0).unwrap();
        let detector = FloorDetector::new(
            Arc::new(segmenter),
            FloorConfig {
                force_bottom_fraction: 0.0,
                ..FloorConfig::default()
            },
            800,
        );
        assert_eq!(detector.detect(&RgbImage::new(10, 10)), FloorOutcome::NotFound);
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
        assert_eq!(polygon_area(&[]), 0.0);
    }
}
