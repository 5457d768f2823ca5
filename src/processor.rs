//! Object removal pipeline
//!
//! This module provides the `ObjectRemovalProcessor` that wires the pipeline stages
//! together. It is used by both the HTTP server and the CLI so the two front-ends
//! behave identically:
//!
//! click -> [`CoordinateMapper`] -> segmentation -> [`MaskBuilder`] -> [`InpaintClient`]
//! -> [`Compositor`] -> optional [`FloorDetector`] on the result.

use crate::{
    compositor::Compositor,
    config::RemovalConfig,
    error::{Result, ShowroomError},
    floor::FloorDetector,
    inference::{GenerativeModel, PromptSegmenter, SegmentationRequest},
    inpaint::InpaintClient,
    mask::MaskBuilder,
    types::{ClickPoint, CompositeResult, FloorOutcome, ProcessingFrame, WorkingMask},
    utils::CoordinateMapper,
};
use image::RgbImage;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, info_span, instrument, Instrument};

/// Everything `/remove-object` needs to build its response
#[derive(Debug, Clone)]
pub struct RemovalOutput {
    pub result: CompositeResult,
    /// Floor analysis of the edited image; `None` when no detector is configured
    pub floor: Option<FloorOutcome>,
    /// Generation attempts used for the patch
    pub attempts: u32,
}

/// End-to-end object removal over injected backends
pub struct ObjectRemovalProcessor {
    config: RemovalConfig,
    segmenter: Arc<dyn PromptSegmenter>,
    mask_builder: MaskBuilder,
    inpainter: InpaintClient,
    compositor: Compositor,
    floor: Option<Arc<FloorDetector>>,
}

impl ObjectRemovalProcessor {
    /// Create a processor from a validated configuration and its backends
    ///
    /// # Errors
    ///
    /// Returns `ShowroomError::InvalidConfig` if the configuration does not validate
    pub fn new(
        config: RemovalConfig,
        segmenter: Arc<dyn PromptSegmenter>,
        model: Arc<dyn GenerativeModel>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            segmenter = segmenter.name(),
            generator = model.name(),
            process_max_dim = config.process_max_dim,
            "Initializing object removal processor"
        );
        Ok(Self {
            mask_builder: MaskBuilder::from_config(&config),
            compositor: Compositor::from_config(&config),
            inpainter: InpaintClient::new(model, config.inpaint.clone()),
            segmenter,
            floor: None,
            config,
        })
    }

    /// Analyze the floor of every edited image with `detector`
    #[must_use]
    pub fn with_floor_detector(mut self, detector: Arc<FloorDetector>) -> Self {
        self.floor = Some(detector);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    #[must_use]
    pub fn floor_detector(&self) -> Option<&Arc<FloorDetector>> {
        self.floor.as_ref()
    }

    /// Bound the image, map the click and build the dilated working mask
    ///
    /// Runs synchronously; async callers should go through [`Self::remove_object`].
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the click lies outside the image
    /// - Segmentation backend failures
    pub fn prepare(&self, image: &RgbImage, click: ClickPoint) -> Result<(ProcessingFrame, WorkingMask)> {
        prepare_frame(
            self.segmenter.as_ref(),
            self.mask_builder,
            image,
            click,
            self.config.process_max_dim,
        )
    }

    /// Remove the object under `click` and return the full-resolution result
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the click lies outside the image
    /// - Segmentation failures
    /// - `Service` once the generative retries are exhausted or hit a fatal error
    /// - Compositing failures
    #[instrument(skip(self, image), fields(
        width = image.width(),
        height = image.height(),
        x = click.x,
        y = click.y
    ))]
    pub async fn remove_object(&self, image: Arc<RgbImage>, click: ClickPoint) -> Result<RemovalOutput> {
        let segmentation_started = Instant::now();
        let (frame, mask) = {
            let segmenter = Arc::clone(&self.segmenter);
            let builder = self.mask_builder;
            let max_dim = self.config.process_max_dim;
            let image = Arc::clone(&image);
            let span = info_span!("segmentation");
            tokio::task::spawn_blocking(move || {
                let _guard = span.enter();
                prepare_frame(segmenter.as_ref(), builder, &image, click, max_dim)
            })
            .await??
        };
        let segmentation_ms = segmentation_started.elapsed().as_millis() as u64;
        debug!(
            segmentation_ms,
            coverage = mask.coverage(),
            scale = frame.scale,
            "Working mask ready"
        );

        let inpaint_started = Instant::now();
        let patch = self
            .inpainter
            .inpaint(&frame, &mask)
            .instrument(info_span!("inpaint"))
            .await?;
        let inpaint_ms = inpaint_started.elapsed().as_millis() as u64;
        let attempts = patch.attempts;

        let mut result = {
            let compositor = self.compositor;
            let image = Arc::clone(&image);
            let span = info_span!("composite");
            tokio::task::spawn_blocking(move || {
                let _guard = span.enter();
                compositor.composite(&image, &frame, &patch, &mask)
            })
            .await??
        };
        result.timings.segmentation_ms = segmentation_ms;
        result.timings.inpaint_ms = inpaint_ms;

        let floor = match &self.floor {
            Some(detector) => Some(run_floor_detection(Arc::clone(detector), result.image.clone()).await?),
            None => None,
        };

        info!(
            total_ms = result.timings.total_ms(),
            inpaint_ms,
            attempts,
            "Object removed"
        );
        Ok(RemovalOutput {
            result,
            floor,
            attempts,
        })
    }

    /// Floor analysis of an arbitrary image with the configured detector
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the processor has no floor detector
    pub async fn analyze_floor(&self, image: RgbImage) -> Result<FloorOutcome> {
        let detector = self
            .floor
            .as_ref()
            .ok_or_else(|| ShowroomError::invalid_config("no floor detector configured"))?;
        run_floor_detection(Arc::clone(detector), image).await
    }
}

/// Run floor detection on the blocking pool
///
/// # Errors
///
/// Only fails if the blocking task panics; detector failures are degraded outcomes
pub async fn run_floor_detection(detector: Arc<FloorDetector>, image: RgbImage) -> Result<FloorOutcome> {
    let span = info_span!("floor_detection");
    let outcome = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        detector.detect(&image)
    })
    .await?;
    Ok(outcome)
}

fn prepare_frame(
    segmenter: &dyn PromptSegmenter,
    builder: MaskBuilder,
    image: &RgbImage,
    click: ClickPoint,
    max_dim: u32,
) -> Result<(ProcessingFrame, WorkingMask)> {
    let frame = CoordinateMapper::to_processing(image, click, max_dim)?;
    let candidates = segmenter.segment(SegmentationRequest {
        image: &frame.image,
        point: frame.point,
    })?;
    if candidates.dimensions() != frame.dimensions() {
        return Err(ShowroomError::segmentation(format!(
            "{} returned {}x{} masks for a {}x{} frame",
            segmenter.name(),
            candidates.dimensions().0,
            candidates.dimensions().1,
            frame.dimensions().0,
            frame.dimensions().1
        )));
    }
    let mask = builder.build(&candidates);
    Ok((frame, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::test_utils::{image_response, MockGenerativeModel, MockPromptSegmenter, MockSemanticSegmenter},
        config::FloorConfig,
        error::ServiceError,
    };
    use image::Rgb;

    fn config(max_dim: u32) -> RemovalConfig {
        RemovalConfig::builder().process_max_dim(max_dim).build().unwrap()
    }

    #[test]
    fn test_prepare_maps_click_into_frame() {
        let processor = ObjectRemovalProcessor::new(
            config(100),
            Arc::new(MockPromptSegmenter::new(4)),
            Arc::new(MockGenerativeModel::new(vec![])),
        )
        .unwrap();
        let image = RgbImage::new(400, 200);
        let (frame, mask) = processor.prepare(&image, ClickPoint::new(200, 100)).unwrap();
        assert_eq!(frame.dimensions(), (100, 50));
        assert_eq!(frame.point, ClickPoint::new(50, 25));
        assert!(mask.contains(50, 25));
    }

    #[test]
    fn test_prepare_rejects_click_outside_image() {
        let processor = ObjectRemovalProcessor::new(
            config(100),
            Arc::new(MockPromptSegmenter::new(4)),
            Arc::new(MockGenerativeModel::new(vec![])),
        )
        .unwrap();
        let err = processor
            .prepare(&RgbImage::new(10, 10), ClickPoint::new(10, 3))
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_object_reports_timings_and_floor() {
        let segmenter = Arc::new(MockSemanticSegmenter::uniform(8, 8, 3).unwrap());
        let detector = FloorDetector::new(segmenter, FloorConfig::default(), 800);
        let processor = ObjectRemovalProcessor::new(
            config(64),
            Arc::new(MockPromptSegmenter::new(4)),
            Arc::new(MockGenerativeModel::always_returning(image_response(64, 32, [9, 9, 9]))),
        )
        .unwrap()
        .with_floor_detector(Arc::new(detector));

        let image = Arc::new(RgbImage::from_pixel(128, 64, Rgb([200, 200, 200])));
        let output = processor
            .remove_object(image, ClickPoint::new(64, 32))
            .await
            .unwrap();
        assert_eq!(output.result.dimensions(), (128, 64));
        assert_eq!(output.attempts, 1);
        assert!(output.floor.is_some_and(|f| f.is_detected()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_failure_propagates() {
        let processor = ObjectRemovalProcessor::new(
            config(64),
            Arc::new(MockPromptSegmenter::new(4)),
            Arc::new(MockGenerativeModel::always_failing(ServiceError::fatal("bad key"))),
        )
        .unwrap();
        let image = Arc::new(RgbImage::new(32, 32));
        let err = processor
            .remove_object(image, ClickPoint::new(16, 16))
            .await
            .unwrap_err();
        assert!(matches!(err, ShowroomError::Service(_)));
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn test_analyze_floor_requires_detector() {
        let processor = ObjectRemovalProcessor::new(
            config(64),
            Arc::new(MockPromptSegmenter::new(4)),
            Arc::new(MockGenerativeModel::new(vec![])),
        )
        .unwrap();
        assert!(processor.analyze_floor(RgbImage::new(4, 4)).await.is_err());
    }
}
