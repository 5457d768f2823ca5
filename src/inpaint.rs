//! Generative inpainting with bounded retries

use crate::{
    config::InpaintConfig,
    error::{Result, ServiceError, ServiceErrorKind, ShowroomError},
    inference::{GenerationRequest, GenerationResponse, GenerativeModel},
    services::ImageIOService,
    types::{GeneratedPatch, ProcessingFrame, WorkingMask},
};
use image::{Rgb, RgbImage};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Paint every masked pixel in `color`
#[must_use]
pub fn mark_region(image: &RgbImage, mask: &WorkingMask, color: [u8; 3]) -> RgbImage {
    let mut marked = image.clone();
    for (pixel, m) in marked.pixels_mut().zip(mask.as_image().pixels()) {
        if m.0[0] > 0 {
            *pixel = Rgb(color);
        }
    }
    marked
}

/// Sends a marked frame to a generative model and returns the replacement pixels
pub struct InpaintClient {
    model: Arc<dyn GenerativeModel>,
    config: InpaintConfig,
}

impl InpaintClient {
    pub fn new(model: Arc<dyn GenerativeModel>, config: InpaintConfig) -> Self {
        Self { model, config }
    }

    #[must_use]
    pub fn config(&self) -> &InpaintConfig {
        &self.config
    }

    /// Inpaint with the configured instruction
    pub async fn inpaint(&self, frame: &ProcessingFrame, mask: &WorkingMask) -> Result<GeneratedPatch> {
        let instruction = self.config.instruction.clone();
        self.inpaint_with_instruction(frame, mask, &instruction).await
    }

    /// Overlay the mask in the marker color and ask the model to replace it
    ///
    /// Rate-limit failures wait `quota_cooldown`, other retryable failures wait
    /// `retry_cooldown`. Fatal failures and the last failed attempt are returned
    /// to the caller. A response without a decodable image part is retryable.
    #[instrument(skip_all, fields(model = %self.config.model, width = frame.image.width(), height = frame.image.height()))]
    pub async fn inpaint_with_instruction(
        &self,
        frame: &ProcessingFrame,
        mask: &WorkingMask,
        instruction: &str,
    ) -> Result<GeneratedPatch> {
        if mask.dimensions() != frame.dimensions() {
            return Err(ShowroomError::processing(format!(
                "mask is {}x{} but frame is {}x{}",
                mask.dimensions().0,
                mask.dimensions().1,
                frame.dimensions().0,
                frame.dimensions().1
            )));
        }

        let marked = mark_region(&frame.image, mask, self.config.marker_color);
        let jpeg = ImageIOService::encode_jpeg(&marked, self.config.request_jpeg_quality)?;
        let request = GenerationRequest::image_edit(&self.config.model, jpeg, instruction);
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Requesting inpainted image");

            let outcome = self
                .model
                .generate(&request)
                .await
                .and_then(|response| decode_patch(&response));

            let error = match outcome {
                Ok(image) => {
                    info!(attempt, "Generative model returned a patch");
                    return Ok(GeneratedPatch {
                        image,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if !error.kind.is_retryable() || attempt >= max_attempts {
                warn!(attempt, kind = %error.kind, error = %error.message, "Inpainting failed");
                return Err(error.into());
            }

            let cooldown = cooldown_for(error.kind, policy.quota_cooldown, policy.retry_cooldown);
            warn!(
                attempt,
                kind = %error.kind,
                cooldown_secs = cooldown.as_secs_f64(),
                error = %error.message,
                "Inpainting attempt failed, retrying"
            );
            tokio::time::sleep(cooldown).await;
        }
    }
}

fn cooldown_for(kind: ServiceErrorKind, quota: Duration, other: Duration) -> Duration {
    match kind {
        ServiceErrorKind::RateLimited => quota,
        ServiceErrorKind::Transient | ServiceErrorKind::Fatal => other,
    }
}

fn decode_patch(response: &GenerationResponse) -> std::result::Result<RgbImage, ServiceError> {
    let bytes = response
        .first_image()
        .ok_or_else(|| ServiceError::transient("response contained no image part"))?;
    image::load_from_memory(bytes)
        .map(|image| image.to_rgb8())
        .map_err(|e| ServiceError::transient(format!("returned image could not be decoded: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::test_utils::{encoded_png, MockGenerativeModel},
        config::RetryPolicy,
        inference::ResponsePart,
        types::ClickPoint,
    };
    use image::{GrayImage, Luma};
    use tokio::time::Instant;

    fn frame(width: u32, height: u32) -> ProcessingFrame {
        ProcessingFrame {
            image: RgbImage::from_pixel(width, height, Rgb([90, 90, 90])),
            scale: 1.0,
            point: ClickPoint::new(0, 0),
            original_dimensions: (width, height),
        }
    }

    fn mask(width: u32, height: u32) -> WorkingMask {
        let mut raw = GrayImage::new(width, height);
        raw.put_pixel(1, 1, Luma([255]));
        WorkingMask::from_image(raw)
    }

    #[test]
    fn test_mark_region_paints_only_masked_pixels() {
        let marked = mark_region(&frame(3, 3).image, &mask(3, 3), [255, 0, 0]);
        assert_eq!(marked.get_pixel(1, 1), &Rgb([255, 0, 0]));
        assert_eq!(marked.get_pixel(0, 0), &Rgb([90, 90, 90]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_cooldown_is_longer() {
        let model = Arc::new(MockGenerativeModel::new(vec![
            Err(ServiceError::rate_limited("429 RESOURCE_EXHAUSTED")),
            Ok(GenerationResponse::new(vec![ResponsePart::Image {
                mime_type: "image/png".into(),
                data: encoded_png(4, 4, [10, 20, 30]),
            }])),
        ]));
        let client = InpaintClient::new(model.clone(), InpaintConfig::default());

        let started = Instant::now();
        let patch = client.inpaint(&frame(4, 4), &mask(4, 4)).await.unwrap();
        assert_eq!(patch.attempts, 2);
        assert_eq!(model.call_count(), 2);
        assert!(started.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let model = Arc::new(MockGenerativeModel::new(vec![Err(ServiceError::fatal(
            "API key not valid",
        ))]));
        let client = InpaintClient::new(model.clone(), InpaintConfig::default());
        let err = client.inpaint(&frame(4, 4), &mask(4, 4)).await.unwrap_err();
        assert_eq!(model.call_count(), 1);
        assert!(err.to_string().contains("fatal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_part_is_retried() {
        let model = Arc::new(MockGenerativeModel::new(vec![
            Ok(GenerationResponse::new(vec![ResponsePart::Text("sorry".into())])),
            Ok(GenerationResponse::new(vec![ResponsePart::Image {
                mime_type: "image/png".into(),
                data: b"garbage".to_vec(),
            }])),
            Ok(GenerationResponse::new(vec![ResponsePart::Image {
                mime_type: "image/png".into(),
                data: encoded_png(4, 4, [1, 2, 3]),
            }])),
        ]));
        let client = InpaintClient::new(model.clone(), InpaintConfig::default());
        let patch = client.inpaint(&frame(4, 4), &mask(4, 4)).await.unwrap();
        assert_eq!(patch.attempts, 3);
        assert_eq!(patch.image.get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_marked_image_and_instruction() {
        let model = Arc::new(MockGenerativeModel::always_failing(ServiceError::transient("down")));
        let config = InpaintConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            ..InpaintConfig::default()
        };
        let client = InpaintClient::new(model.clone(), config);
        assert!(client
            .inpaint_with_instruction(&frame(4, 4), &mask(4, 4), "erase the chair")
            .await
            .is_err());

        let requests = model.requests();
        let request = requests.first().unwrap();
        assert_eq!(request.candidate_count, 1);
        assert!(matches!(
            request.parts.get(1),
            Some(crate::inference::RequestPart::Text(text)) if text == "erase the chair"
        ));
    }

    #[tokio::test]
    async fn test_mask_shape_mismatch_is_rejected() {
        let model = Arc::new(MockGenerativeModel::new(vec![]));
        let client = InpaintClient::new(model.clone(), InpaintConfig::default());
        assert!(client.inpaint(&frame(4, 4), &mask(5, 4)).await.is_err());
        assert_eq!(model.call_count(), 0);
    }
}
