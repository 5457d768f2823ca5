//! Service seams for the external models the pipeline depends on
//!
//! Segmentation backends are synchronous and CPU/GPU bound; callers run them on the
//! blocking pool. The generative model is a remote service and is async.

use crate::{
    error::{Result, ServiceError},
    types::{CandidateMaskSet, ClassMap, ClickPoint},
};
use async_trait::async_trait;
use image::RgbImage;

/// One click-driven segmentation request
///
/// Implementations must not retain the image between calls; anything stateful
/// inside the underlying model is serialized by the implementation itself.
#[derive(Debug, Clone, Copy)]
pub struct SegmentationRequest<'a> {
    pub image: &'a RgbImage,
    pub point: ClickPoint,
}

/// Promptable segmentation: image + single foreground point -> three candidate masks
pub trait PromptSegmenter: Send + Sync {
    /// Segment the object under `request.point`
    ///
    /// # Errors
    /// - Model inference failures
    /// - Output tensors with an unexpected shape
    fn segment(&self, request: SegmentationRequest<'_>) -> Result<CandidateMaskSet>;

    fn name(&self) -> &str;
}

/// Semantic segmentation: image -> per-pixel class indices
pub trait SemanticSegmenter: Send + Sync {
    /// Classify every pixel; the map may be smaller than the image
    ///
    /// # Errors
    /// - Model inference failures
    fn classify(&self, image: &RgbImage) -> Result<ClassMap>;

    fn name(&self) -> &str;
}

/// Output modality requested from a generative model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Image,
    Text,
}

impl ResponseModality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Text => "TEXT",
        }
    }
}

/// Input part of a generation request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart {
    Text(String),
    InlineImage { mime_type: String, data: Vec<u8> },
}

/// A single-turn request to a hosted multimodal model
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub parts: Vec<RequestPart>,
    pub system_instruction: Option<String>,
    pub modalities: Vec<ResponseModality>,
    pub candidate_count: u32,
}

impl GenerationRequest {
    /// Image-edit request: one image plus an instruction, one image-only candidate back
    #[must_use]
    pub fn image_edit(model: &str, jpeg: Vec<u8>, instruction: &str) -> Self {
        Self {
            model: model.to_string(),
            parts: vec![
                RequestPart::InlineImage {
                    mime_type: "image/jpeg".to_string(),
                    data: jpeg,
                },
                RequestPart::Text(instruction.to_string()),
            ],
            system_instruction: None,
            modalities: vec![ResponseModality::Image],
            candidate_count: 1,
        }
    }

    /// Text answer about an image, steered by a system instruction
    #[must_use]
    pub fn describe_image(model: &str, jpeg: Vec<u8>, system_instruction: String, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            parts: vec![
                RequestPart::InlineImage {
                    mime_type: "image/jpeg".to_string(),
                    data: jpeg,
                },
                RequestPart::Text(prompt.to_string()),
            ],
            system_instruction: Some(system_instruction),
            modalities: vec![ResponseModality::Text],
            candidate_count: 1,
        }
    }
}

/// Output part of a generation response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// Parts returned by a generative model, in response order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub parts: Vec<ResponsePart>,
}

impl GenerationResponse {
    #[must_use]
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        Self { parts }
    }

    /// First image-bearing part, if any
    #[must_use]
    pub fn first_image(&self) -> Option<&[u8]> {
        self.parts.iter().find_map(|part| match part {
            ResponsePart::Image { data, .. } => Some(data.as_slice()),
            ResponsePart::Text(_) => None,
        })
    }

    /// All text parts joined in order
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text(text) => Some(text.as_str()),
                ResponsePart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Hosted multimodal generative model
///
/// Failures are classified by the implementation; callers decide on retries
/// from [`crate::error::ServiceErrorKind`] alone.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ServiceError>;

    fn name(&self) -> &str;
}
