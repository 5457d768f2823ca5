//! Backend implementations of the service seams in [`crate::inference`]
//!
//! - Gemini REST client for generative inpainting and recommendations
//! - ONNX Runtime backends for promptable and semantic segmentation
//! - Mock backends for tests

pub mod gemini;

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod test_utils;

pub use self::gemini::GeminiClient;

#[cfg(feature = "onnx")]
pub use self::onnx::{AdeSegmenter, SamSegmenter};
