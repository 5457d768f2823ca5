//! ONNX Runtime adapters for promptable (SAM) and semantic (ADE20K) segmentation

use crate::{
    config::ExecutionProvider,
    error::{Result, ShowroomError},
    inference::{PromptSegmenter, SegmentationRequest, SemanticSegmenter},
    types::{CandidateMaskSet, ClassMap},
};
use image::{imageops, imageops::FilterType, GrayImage, Luma, RgbImage};
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use ort::{
    ep::{
        CoreML as CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
        CUDA as CUDAExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::{path::Path, sync::Mutex, time::Instant};
use tracing::{debug, info, instrument, warn};

/// Longest side of the SAM encoder input
pub const SAM_INPUT_SIZE: u32 = 1024;
const SAM_PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const SAM_PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

fn ort_error<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> ShowroomError + '_ {
    move |e| ShowroomError::model(format!("{context}: {e}"))
}

fn tensor_error<E: std::fmt::Display>(e: E) -> ShowroomError {
    ShowroomError::segmentation(format!("tensor conversion: {e}"))
}

/// Create a session for `model_path`, registering the requested execution provider when available
pub fn create_session(model_path: &Path, provider: ExecutionProvider) -> Result<Session> {
    if !model_path.is_file() {
        return Err(ShowroomError::model(format!(
            "model file not found: {}",
            model_path.display()
        )));
    }
    let started = Instant::now();
    let builder = Session::builder()
        .map_err(ort_error("Failed to create session builder"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_error("Failed to set optimization level"))?;

    let mut builder = match provider {
        ExecutionProvider::Cpu => {
            info!("Using CPU execution provider");
            builder
        },
        ExecutionProvider::Auto => {
            let mut providers = Vec::new();
            let cuda = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
                info!("CUDA execution provider is available and will be used");
                providers.push(cuda.build());
            }
            let coreml = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
                info!("CoreML execution provider is available and will be used");
                providers.push(coreml.with_subgraphs(true).build());
            }
            if providers.is_empty() {
                warn!("No hardware acceleration available, falling back to CPU");
                builder
            } else {
                builder
                    .with_execution_providers(providers)
                    .map_err(ort_error("Failed to set auto execution providers"))?
            }
        },
        ExecutionProvider::Cuda => {
            let cuda = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
                info!("Using CUDA execution provider");
                builder
                    .with_execution_providers([cuda.build()])
                    .map_err(ort_error("Failed to set CUDA execution provider"))?
            } else {
                warn!("CUDA execution provider requested but not available, falling back to CPU");
                builder
            }
        },
        ExecutionProvider::CoreMl => {
            let coreml = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
                info!("Using CoreML execution provider");
                builder
                    .with_execution_providers([coreml.with_subgraphs(true).build()])
                    .map_err(ort_error("Failed to set CoreML execution provider"))?
            } else {
                warn!("CoreML execution provider requested but not available, falling back to CPU");
                builder
            }
        },
    };

    let session = builder
        .commit_from_file(model_path)
        .map_err(ort_error("Failed to load model"))?;
    debug!(
        model = %model_path.display(),
        load_ms = started.elapsed().as_millis() as u64,
        "ONNX session ready"
    );
    Ok(session)
}

/// Execution providers compiled into this build and whether they can be used here
#[must_use]
pub fn list_providers() -> Vec<(String, bool)> {
    vec![
        ("cpu".to_string(), true),
        (
            "cuda".to_string(),
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false),
        ),
        (
            "coreml".to_string(),
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false),
        ),
    ]
}

fn first_output_array(outputs: &ort::session::SessionOutputs<'_>, name: Option<&str>) -> Result<ArrayD<f32>> {
    let value = match name {
        Some(name) => outputs.get(name),
        None => outputs.keys().next().and_then(|key| outputs.get(key)),
    }
    .ok_or_else(|| ShowroomError::segmentation("expected output tensor not found"))?;
    let array = value
        .try_extract_array::<f32>()
        .map_err(|e| ShowroomError::segmentation(format!("Failed to extract output tensor: {e}")))?;
    Ok(array.to_owned())
}

struct SamSessions {
    encoder: Session,
    decoder: Session,
}

/// Segment Anything encoder/decoder pair
///
/// Both sessions sit behind one lock, so an embedding computed for one request can
/// never be paired with another request's prompt.
pub struct SamSegmenter {
    sessions: Mutex<SamSessions>,
}

impl SamSegmenter {
    pub fn load(encoder_path: &Path, decoder_path: &Path, provider: ExecutionProvider) -> Result<Self> {
        let encoder = create_session(encoder_path, provider)?;
        let decoder = create_session(decoder_path, provider)?;
        Ok(Self {
            sessions: Mutex::new(SamSessions { encoder, decoder }),
        })
    }

    /// Resize the longest side to 1024, normalize and zero-pad bottom/right
    #[must_use]
    pub fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
        let (width, height) = image.dimensions();
        let longest = width.max(height).max(1);
        let scale = SAM_INPUT_SIZE as f32 / longest as f32;
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, SAM_INPUT_SIZE);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, SAM_INPUT_SIZE);
        let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let size = SAM_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, (&value, (mean, std))) in pixel
                .0
                .iter()
                .zip(SAM_PIXEL_MEAN.iter().zip(SAM_PIXEL_STD.iter()))
                .enumerate()
            {
                if let Some(slot) = tensor.get_mut([0, c, y as usize, x as usize]) {
                    *slot = (f32::from(value) - mean) / std;
                }
            }
        }
        (tensor, scale)
    }

    fn masks_from_output(masks: ArrayD<f32>, width: u32, height: u32) -> Result<CandidateMaskSet> {
        let masks = masks
            .into_dimensionality::<Ix4>()
            .map_err(|e| ShowroomError::segmentation(format!("masks output is not 4D: {e}")))?;
        let (_, count, mask_h, mask_w) = masks.dim();
        if count == 0 || masks.dim().0 == 0 {
            return Err(ShowroomError::segmentation("decoder returned no masks"));
        }
        let first = masks.index_axis(Axis(0), 0);
        // Four masks means the single-mask token came first
        let skip = usize::from(count == 4);
        let mut planes: Vec<GrayImage> = Vec::with_capacity(3);
        for i in skip..count.min(skip + 3) {
            let plane = first.index_axis(Axis(0), i);
            let raw: Vec<u8> = plane.iter().map(|&v| if v > 0.0 { 255 } else { 0 }).collect();
            let mask = GrayImage::from_raw(mask_w as u32, mask_h as u32, raw)
                .ok_or_else(|| ShowroomError::segmentation("mask plane size mismatch"))?;
            let mask = if mask.dimensions() == (width, height) {
                mask
            } else {
                imageops::resize(&mask, width, height, FilterType::Nearest)
            };
            planes.push(mask);
        }
        while planes.len() < 3 {
            let last = planes
                .last()
                .cloned()
                .unwrap_or_else(|| GrayImage::from_pixel(width, height, Luma([0])));
            planes.push(last);
        }
        let [a, b, c]: [GrayImage; 3] = planes
            .try_into()
            .map_err(|_| ShowroomError::segmentation("expected three candidate masks"))?;
        CandidateMaskSet::new([a, b, c])
    }
}

impl PromptSegmenter for SamSegmenter {
    #[instrument(skip_all, fields(x = request.point.x, y = request.point.y))]
    fn segment(&self, request: SegmentationRequest<'_>) -> Result<CandidateMaskSet> {
        let (width, height) = request.image.dimensions();
        let (input, scale) = Self::preprocess(request.image);

        let point_coords = Array3::<f32>::from_shape_vec(
            (1, 2, 2),
            vec![
                request.point.x as f32 * scale,
                request.point.y as f32 * scale,
                0.0,
                0.0,
            ],
        )
        .map_err(|e| ShowroomError::segmentation(format!("point coords: {e}")))?;
        let point_labels = Array2::<f32>::from_shape_vec((1, 2), vec![1.0, -1.0])
            .map_err(|e| ShowroomError::segmentation(format!("point labels: {e}")))?;
        let mask_input = Array4::<f32>::zeros((1, 1, 256, 256));
        let has_mask_input = Array1::<f32>::from_vec(vec![0.0]);
        let orig_im_size = Array1::<f32>::from_vec(vec![height as f32, width as f32]);

        let input = Tensor::from_array(input).map_err(tensor_error)?;
        let coords = Tensor::from_array(point_coords).map_err(tensor_error)?;
        let labels = Tensor::from_array(point_labels).map_err(tensor_error)?;
        let mask_input = Tensor::from_array(mask_input).map_err(tensor_error)?;
        let has_mask_input = Tensor::from_array(has_mask_input).map_err(tensor_error)?;
        let orig_im_size = Tensor::from_array(orig_im_size).map_err(tensor_error)?;

        let mut guard = self
            .sessions
            .lock()
            .map_err(|_| ShowroomError::internal("SAM session lock poisoned"))?;
        let sessions = &mut *guard;

        let started = Instant::now();
        let embedding = {
            let outputs = sessions
                .encoder
                .run(ort::inputs![input])
                .map_err(|e| ShowroomError::segmentation(format!("SAM encoder failed: {e}")))?;
            first_output_array(&outputs, None)?
        };
        let embedding = Tensor::from_array(embedding).map_err(tensor_error)?;

        let outputs = sessions
            .decoder
            .run(ort::inputs![
                "image_embeddings" => embedding,
                "point_coords" => coords,
                "point_labels" => labels,
                "mask_input" => mask_input,
                "has_mask_input" => has_mask_input,
                "orig_im_size" => orig_im_size,
            ])
            .map_err(|e| ShowroomError::segmentation(format!("SAM decoder failed: {e}")))?;
        let masks = first_output_array(&outputs, Some("masks"))?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "SAM inference complete");

        Self::masks_from_output(masks, width, height)
    }

    fn name(&self) -> &str {
        "sam-onnx"
    }
}

/// Semantic segmentation model trained on ADE20K (e.g. an exported `SegFormer`)
pub struct AdeSegmenter {
    session: Mutex<Session>,
    input_size: u32,
}

impl AdeSegmenter {
    pub fn load(model_path: &Path, provider: ExecutionProvider) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(create_session(model_path, provider)?),
            input_size: 640,
        })
    }

    #[must_use]
    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size.max(1);
        self
    }

    /// Square resize, `(v / 255 - 0.5) / 0.5`, NCHW
    #[must_use]
    pub fn preprocess(image: &RgbImage, input_size: u32) -> Array4<f32> {
        let resized = imageops::resize(image, input_size, input_size, FilterType::Triangle);
        let size = input_size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &value) in pixel.0.iter().enumerate() {
                if let Some(slot) = tensor.get_mut([0, c, y as usize, x as usize]) {
                    *slot = (f32::from(value) / 255.0 - 0.5) / 0.5;
                }
            }
        }
        tensor
    }

    /// Arg-max over the class axis of `[1, C, h, w]` logits
    pub fn argmax(logits: ArrayD<f32>) -> Result<ClassMap> {
        let logits = logits
            .into_dimensionality::<Ix4>()
            .map_err(|e| ShowroomError::segmentation(format!("logits are not 4D: {e}")))?;
        let (batch, classes, height, width) = logits.dim();
        if batch == 0 || classes == 0 {
            return Err(ShowroomError::segmentation("logits have no classes"));
        }
        let logits = logits.index_axis(Axis(0), 0);
        let mut labels = vec![0u16; height * width];
        let mut best = vec![f32::NEG_INFINITY; height * width];
        for (class, plane) in logits.axis_iter(Axis(0)).enumerate() {
            for ((value, label), best) in plane.iter().zip(labels.iter_mut()).zip(best.iter_mut()) {
                if *value > *best {
                    *best = *value;
                    *label = class as u16;
                }
            }
        }
        ClassMap::new(width as u32, height as u32, labels)
    }
}

impl SemanticSegmenter for AdeSegmenter {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn classify(&self, image: &RgbImage) -> Result<ClassMap> {
        let input = Tensor::from_array(Self::preprocess(image, self.input_size)).map_err(tensor_error)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ShowroomError::internal("segmentation session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ShowroomError::segmentation(format!("semantic segmentation failed: {e}")))?;
        let logits = first_output_array(&outputs, None)?;
        Self::argmax(logits)
    }

    fn name(&self) -> &str {
        "ade20k-onnx"
    }
}
