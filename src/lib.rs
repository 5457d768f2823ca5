#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Showroom
//!
//! Object removal, floor detection and furniture recommendation for panoramic room photos.
//!
//! A click on an unwanted object is turned into a segmentation mask, the masked region is
//! regenerated by a generative image model, and the patch is blended back into the
//! full-resolution photo. The edited room can then be analysed for its floor area.
//!
//! ## Features
//!
//! - **Click-to-remove**: promptable segmentation (SAM) with mask dilation
//! - **Generative inpainting**: Gemini image editing with bounded retry and backoff
//! - **Seamless compositing**: histogram matching and feathered blending at full resolution
//! - **Floor detection**: ADE20K semantic segmentation rendered as an overlay or polygon
//! - **Furniture consultation**: catalog-grounded recommendations from a room photo
//! - **HTTP server and CLI**: optional front-ends (`server` and `cli` features)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use showroom::{
//!     backends::{GeminiClient, SamSegmenter},
//!     ExecutionProvider, ObjectRemovalProcessor, RemovalConfig,
//! };
//! use std::{path::Path, sync::Arc};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let config = RemovalConfig::builder()
//!     .execution_provider(ExecutionProvider::Auto)
//!     .build()?;
//! let segmenter = SamSegmenter::load(
//!     Path::new("sam_encoder.onnx"),
//!     Path::new("sam_decoder.onnx"),
//!     config.execution_provider,
//! )?;
//! let processor = ObjectRemovalProcessor::new(
//!     config,
//!     Arc::new(segmenter),
//!     Arc::new(GeminiClient::from_env()?),
//! )?;
//!
//! let output = showroom::remove_object_from_bytes(&processor, &upload, 2000, 1000).await?;
//! output.result.image.save("room_removed.jpg")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): SAM and ADE20K backends on ONNX Runtime
//! - `server` (default): axum HTTP surface
//! - `cli` (default): command-line interface, progress bars and tracing setup
//! - `webp-support` (default): WebP uploads
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod floor;
pub mod inference;
pub mod inpaint;
pub mod mask;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

pub use backends::GeminiClient;
pub use catalog::{Curator, FurnitureCatalog, FurnitureItem, Recommendation};
pub use compositor::Compositor;
pub use config::{ExecutionProvider, FloorOutputMode, RemovalConfig, RetryPolicy};
pub use download::{ModelArtifact, ModelDownloader};
pub use error::{Result, ServiceError, ServiceErrorKind, ShowroomError};
pub use floor::FloorDetector;
pub use inference::{GenerativeModel, PromptSegmenter, SemanticSegmenter};
pub use inpaint::InpaintClient;
pub use mask::MaskBuilder;
pub use processor::{ObjectRemovalProcessor, RemovalOutput};
pub use services::ImageIOService;
pub use types::{ClickPoint, CompositeResult, FloorOutcome, FloorPoint, FloorProduct};
pub use utils::CoordinateMapper;

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Remove the object at `(x, y)` from an encoded image
///
/// Coordinates are in the pixel space of the decoded image; negative or out-of-range
/// values are rejected as `InvalidInput`.
///
/// # Examples
///
/// ```rust,no_run
/// use showroom::{remove_object_from_bytes, ObjectRemovalProcessor};
///
/// # async fn example(processor: &ObjectRemovalProcessor, upload: Vec<u8>) -> anyhow::Result<()> {
/// let output = remove_object_from_bytes(processor, &upload, 120, 340).await?;
/// println!("{} generation attempts", output.attempts);
/// # Ok(())
/// # }
/// ```
pub async fn remove_object_from_bytes(
    processor: &ObjectRemovalProcessor,
    image_bytes: &[u8],
    x: i64,
    y: i64,
) -> Result<RemovalOutput> {
    let image = ImageIOService::load_from_bytes(image_bytes)?;
    let click = ClickPoint::from_signed(x, y, image.width(), image.height())?;
    processor.remove_object(std::sync::Arc::new(image), click).await
}

/// Remove the object at `(x, y)` from an image read off an async stream
pub async fn remove_object_from_reader<R: AsyncRead + Unpin>(
    processor: &ObjectRemovalProcessor,
    reader: R,
    x: i64,
    y: i64,
) -> Result<RemovalOutput> {
    let image = ImageIOService::load_from_reader(reader).await?;
    let click = ClickPoint::from_signed(x, y, image.width(), image.height())?;
    processor.remove_object(std::sync::Arc::new(image), click).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{encoded_png, image_response, MockGenerativeModel, MockPromptSegmenter};
    use std::sync::Arc;

    fn processor() -> ObjectRemovalProcessor {
        ObjectRemovalProcessor::new(
            RemovalConfig::builder().process_max_dim(32).build().unwrap(),
            Arc::new(MockPromptSegmenter::new(3)),
            Arc::new(MockGenerativeModel::always_returning(image_response(32, 32, [0, 0, 0]))),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_remove_object_from_bytes() {
        let png = encoded_png(64, 64, [180, 180, 180]);
        let output = remove_object_from_bytes(&processor(), &png, 10, 10).await.unwrap();
        assert_eq!(output.result.dimensions(), (64, 64));
    }

    #[tokio::test]
    async fn test_remove_object_from_reader_rejects_negative_click() {
        let png = encoded_png(16, 16, [10, 10, 10]);
        let err = remove_object_from_reader(&processor(), std::io::Cursor::new(png), -1, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ShowroomError::InvalidInput(_)));
    }
}
