//! Mock backends for exercising the pipeline without model files or network access

use crate::{
    error::{Result, ServiceError, ShowroomError},
    inference::{
        GenerationRequest, GenerationResponse, GenerativeModel, PromptSegmenter, ResponsePart,
        SegmentationRequest, SemanticSegmenter,
    },
    types::{CandidateMaskSet, ClassMap},
};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{Arc, Mutex},
};

/// Solid-color PNG bytes, handy as a scripted generative response
#[must_use]
pub fn encoded_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut cursor = Cursor::new(Vec::new());
    // Writing a small in-memory PNG only fails on allocation failure
    let _ = DynamicImage::ImageRgb8(image).write_to(&mut cursor, ImageFormat::Png);
    cursor.into_inner()
}

/// Image response holding one solid-color PNG
#[must_use]
pub fn image_response(width: u32, height: u32, color: [u8; 3]) -> GenerationResponse {
    GenerationResponse::new(vec![ResponsePart::Image {
        mime_type: "image/png".to_string(),
        data: encoded_png(width, height, color),
    }])
}

/// Text-only response
#[must_use]
pub fn text_response(text: &str) -> GenerationResponse {
    GenerationResponse::new(vec![ResponsePart::Text(text.to_string())])
}

type Scripted = std::result::Result<GenerationResponse, ServiceError>;

/// Generative model that replays a script of responses and records every request
#[derive(Debug, Clone)]
pub struct MockGenerativeModel {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    /// Returned once the script is exhausted
    fallback: Option<Scripted>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerativeModel {
    /// Replay `script` in order; calls past its end fail as transient
    #[must_use]
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            fallback: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every call with `error`
    #[must_use]
    pub fn always_failing(error: ServiceError) -> Self {
        let mut model = Self::new(Vec::new());
        model.fallback = Some(Err(error));
        model
    }

    /// Answer every call with `response`
    #[must_use]
    pub fn always_returning(response: GenerationResponse) -> Self {
        let mut model = Self::new(Vec::new());
        model.fallback = Some(Ok(response));
        model
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerativeModel for MockGenerativeModel {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ServiceError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.fallback) {
            (Some(scripted), _) => scripted,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => Err(ServiceError::transient("mock script exhausted")),
        }
    }

    fn name(&self) -> &str {
        "mock-generative"
    }
}

/// Promptable segmenter that selects a square around the click
#[derive(Debug, Clone)]
pub struct MockPromptSegmenter {
    half_size: u32,
    should_fail: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockPromptSegmenter {
    /// Candidates are squares of half-size `half_size`, `half_size / 2` and 1 around the click
    #[must_use]
    pub fn new(half_size: u32) -> Self {
        Self {
            half_size,
            should_fail: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn new_failing() -> Self {
        let mut segmenter = Self::new(1);
        segmenter.should_fail = true;
        segmenter
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn square(width: u32, height: u32, cx: u32, cy: u32, half: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let inside = x.abs_diff(cx) <= half && y.abs_diff(cy) <= half;
            Luma([if inside { 255 } else { 0 }])
        })
    }
}

impl PromptSegmenter for MockPromptSegmenter {
    fn segment(&self, request: SegmentationRequest<'_>) -> Result<CandidateMaskSet> {
        let (width, height) = request.image.dimensions();
        if let Ok(mut history) = self.call_history.lock() {
            history.push(format!(
                "segment({}x{} @ {},{})",
                width, height, request.point.x, request.point.y
            ));
        }
        if self.should_fail {
            return Err(ShowroomError::segmentation("mock segmentation failure"));
        }
        let (cx, cy) = (request.point.x, request.point.y);
        CandidateMaskSet::new([
            Self::square(width, height, cx, cy, self.half_size),
            Self::square(width, height, cx, cy, self.half_size / 2),
            Self::square(width, height, cx, cy, 1),
        ])
    }

    fn name(&self) -> &str {
        "mock-prompt-segmenter"
    }
}

/// Semantic segmenter returning a fixed label grid
#[derive(Debug, Clone)]
pub struct MockSemanticSegmenter {
    labels: ClassMap,
    should_fail: bool,
    calls: Arc<Mutex<usize>>,
}

impl MockSemanticSegmenter {
    #[must_use]
    pub fn new(labels: ClassMap) -> Self {
        Self {
            labels,
            should_fail: false,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Everything labelled `class`
    pub fn uniform(width: u32, height: u32, class: u16) -> Result<Self> {
        Ok(Self::new(ClassMap::new(
            width,
            height,
            vec![class; width as usize * height as usize],
        )?))
    }

    /// Rows from `floor_from` down labelled `floor_class`, the rest wall (class 0)
    pub fn floor_below(width: u32, height: u32, floor_from: u32, floor_class: u16) -> Result<Self> {
        let labels = (0..height)
            .flat_map(|y| {
                let class = if y >= floor_from { floor_class } else { 0 };
                std::iter::repeat(class).take(width as usize)
            })
            .collect();
        Ok(Self::new(ClassMap::new(width, height, labels)?))
    }

    #[must_use]
    pub fn new_failing() -> Self {
        let mut segmenter = Self::new(ClassMap::empty());
        segmenter.should_fail = true;
        segmenter
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

impl SemanticSegmenter for MockSemanticSegmenter {
    fn classify(&self, _image: &RgbImage) -> Result<ClassMap> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        if self.should_fail {
            return Err(ShowroomError::segmentation("mock classifier failure"));
        }
        Ok(self.labels.clone())
    }

    fn name(&self) -> &str {
        "mock-semantic-segmenter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClickPoint;

    #[tokio::test]
    async fn test_mock_generative_script() {
        let model = MockGenerativeModel::new(vec![
            Err(ServiceError::rate_limited("quota")),
            Ok(text_response("hello")),
        ]);
        let request = GenerationRequest::image_edit("m", vec![], "x");
        assert!(model.generate(&request).await.is_err());
        assert_eq!(model.generate(&request).await.unwrap().text(), "hello");
        assert!(model.generate(&request).await.is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn test_mock_prompt_segmenter() {
        let segmenter = MockPromptSegmenter::new(4);
        let image = RgbImage::new(20, 20);
        let set = segmenter
            .segment(SegmentationRequest {
                image: &image,
                point: ClickPoint::new(10, 10),
            })
            .unwrap();
        assert_eq!(set.dimensions(), (20, 20));
        assert_eq!(set.masks()[0].get_pixel(14, 10).0[0], 255);
        assert_eq!(set.masks()[0].get_pixel(15, 10).0[0], 0);
        assert_eq!(segmenter.get_call_history().len(), 1);

        assert!(MockPromptSegmenter::new_failing()
            .segment(SegmentationRequest {
                image: &image,
                point: ClickPoint::new(0, 0),
            })
            .is_err());
    }

    #[test]
    fn test_mock_semantic_segmenter() {
        let segmenter = MockSemanticSegmenter::floor_below(4, 4, 2, 3).unwrap();
        let map = segmenter.classify(&RgbImage::new(8, 8)).unwrap();
        assert_eq!(map.get(0, 1), Some(0));
        assert_eq!(map.get(0, 2), Some(3));
        assert_eq!(segmenter.call_count(), 1);
        assert!(MockSemanticSegmenter::new_failing()
            .classify(&RgbImage::new(1, 1))
            .is_err());
    }
}
