//! Image I/O operations service
//!
//! Decoding of uploads and files, JPEG/PNG encoding and data-URI rendering,
//! kept apart from the pixel pipeline so it can be tested on its own.

use crate::error::{Result, ShowroomError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::{io::Cursor, path::Path};
use tracing::debug;

/// Service for handling image decode/encode operations
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an uploaded image and flatten it to 8-bit RGB
    ///
    /// Undecodable payloads are reported as `InvalidInput`.
    pub fn load_from_bytes(bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(ShowroomError::invalid_input("uploaded image is empty"));
        }
        let image = image::load_from_memory(bytes).map_err(|e| {
            ShowroomError::invalid_input(format!("Failed to decode image from bytes: {}", e))
        })?;
        Ok(image.to_rgb8())
    }

    /// Load an image from a file path
    ///
    /// # Examples
    /// ```rust,no_run
    /// use showroom::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("room.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
        let path_ref = path.as_ref();
        let data = std::fs::read(path_ref)
            .map_err(|e| ShowroomError::file_io_error("read image file", path_ref, &e))?;
        debug!(path = %path_ref.display(), bytes = data.len(), "Loaded image file");
        Self::load_from_bytes(&data)
    }

    /// Read an image from any async reader
    pub async fn load_from_reader<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<RgbImage> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Self::load_from_bytes(&buffer)
    }

    /// Encode as baseline JPEG at the given quality
    pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        encoder.encode_image(image)?;
        Ok(buffer)
    }

    /// Encode an RGBA raster losslessly as PNG
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image.clone()).write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }

    /// `data:{mime};base64,...`
    #[must_use]
    pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
    }

    pub fn jpeg_data_uri(image: &RgbImage, quality: u8) -> Result<String> {
        Ok(Self::data_uri("image/jpeg", &Self::encode_jpeg(image, quality)?))
    }

    pub fn png_data_uri(image: &RgbaImage) -> Result<String> {
        Ok(Self::data_uri("image/png", &Self::encode_png(image)?))
    }

    /// Decode the payload of a `data:` URI (or bare base64)
    pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
        let payload = match uri.split_once(";base64,") {
            Some((_, payload)) => payload,
            None => uri,
        };
        STANDARD
            .decode(payload.trim())
            .map_err(|e| ShowroomError::invalid_input(format!("invalid base64 payload: {e}")))
    }

    /// Write bytes to disk, creating parent directories
    pub fn save_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ShowroomError::file_io_error("create output directory", parent, &e))?;
        }
        std::fs::write(path_ref, bytes)
            .map_err(|e| ShowroomError::file_io_error("write output file", path_ref, &e))
    }
}
