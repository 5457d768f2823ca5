//! Configuration types for object removal and floor analysis

use crate::error::{Result, ShowroomError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Image model used for inpainting
pub const DEFAULT_INPAINT_MODEL: &str = "gemini-2.5-flash-image";

/// Instruction sent alongside the marked image
pub const DEFAULT_REMOVAL_INSTRUCTION: &str = "The area marked in RED is an unwanted object. \
Remove it completely and fill the space with a realistic wooden floor and white wall to match the room. \
The result should look like a high-quality real estate photo. \
Make sure the lighting and shadows are consistent with the rest of the room.";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = ShowroomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(ShowroomError::invalid_config(format!(
                "unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Which presentation(s) of the floor mask to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FloorOutputMode {
    /// Translucent PNG overlay (`mask_image`)
    #[default]
    Overlay,
    /// Simplified outer contour (`floor_boundary`)
    Polygon,
    /// Both keys
    Both,
}

impl FloorOutputMode {
    #[must_use]
    pub fn wants_overlay(self) -> bool {
        matches!(self, Self::Overlay | Self::Both)
    }

    #[must_use]
    pub fn wants_polygon(self) -> bool {
        matches!(self, Self::Polygon | Self::Both)
    }
}

impl std::str::FromStr for FloorOutputMode {
    type Err = ShowroomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlay" | "mask" => Ok(Self::Overlay),
            "polygon" | "boundary" => Ok(Self::Polygon),
            "both" => Ok(Self::Both),
            other => Err(ShowroomError::invalid_config(format!(
                "unknown floor output mode '{other}' (expected overlay, polygon or both)"
            ))),
        }
    }
}

/// Attempt budget and cooldowns for generative calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after a rate-limit / quota signal
    pub quota_cooldown: Duration,
    /// Wait after any other retryable failure
    pub retry_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quota_cooldown: Duration::from_secs(40),
            retry_cooldown: Duration::from_secs(5),
        }
    }
}

/// Generative inpainting request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InpaintConfig {
    pub model: String,
    pub instruction: String,
    /// Color painted over masked pixels to tell the model what to replace
    pub marker_color: [u8; 3],
    /// JPEG quality of the marked request image
    pub request_jpeg_quality: u8,
    pub retry: RetryPolicy,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_INPAINT_MODEL.to_string(),
            instruction: DEFAULT_REMOVAL_INSTRUCTION.to_string(),
            marker_color: [255, 0, 0],
            request_jpeg_quality: 95,
            retry: RetryPolicy::default(),
        }
    }
}

/// Floor detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorConfig {
    /// Semantic classes treated as floor (ADE20K indices)
    pub classes: Vec<u16>,
    /// Bottom band of rows always forced to floor
    pub force_bottom_fraction: f64,
    /// Side of the square closing kernel
    pub closing_kernel: u32,
    /// RGBA color of overlay pixels
    pub overlay_color: [u8; 4],
    /// Douglas-Peucker tolerance as a fraction of the contour perimeter
    pub polygon_epsilon_fraction: f64,
    pub output_mode: FloorOutputMode,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            classes: vec![3, 9, 27, 29],
            force_bottom_fraction: 0.05,
            closing_kernel: 50,
            overlay_color: [0, 255, 0, 200],
            polygon_epsilon_fraction: 0.005,
            output_mode: FloorOutputMode::Overlay,
        }
    }
}

/// Configuration for object removal and floor analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Longest side of the frame sent to segmentation and generation
    pub process_max_dim: u32,
    /// Longest side of the frame used for floor analysis
    pub analysis_max_dim: u32,
    /// Side of the square dilation kernel
    pub dilation_kernel: u32,
    pub dilation_iterations: u32,
    /// Side of the Gaussian feathering kernel (odd)
    pub feather_kernel: u32,
    /// JPEG quality of the returned photograph
    pub jpeg_quality: u8,
    pub execution_provider: ExecutionProvider,
    pub inpaint: InpaintConfig,
    pub floor: FloorConfig,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            process_max_dim: 2048,
            analysis_max_dim: 800,
            dilation_kernel: 10,
            dilation_iterations: 3,
            feather_kernel: 21,
            jpeg_quality: 95,
            execution_provider: ExecutionProvider::Auto,
            inpaint: InpaintConfig::default(),
            floor: FloorConfig::default(),
        }
    }
}

impl RemovalConfig {
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Gaussian sigma for the feathering kernel, derived from its size
    #[must_use]
    pub fn feather_sigma(&self) -> f32 {
        let k = self.feather_kernel.max(1) as f32;
        0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.process_max_dim == 0 {
            return Err(ShowroomError::config_value_error("process_max_dim", 0, ">= 1"));
        }
        if self.analysis_max_dim == 0 {
            return Err(ShowroomError::config_value_error("analysis_max_dim", 0, ">= 1"));
        }
        if self.dilation_kernel == 0 {
            return Err(ShowroomError::config_value_error("dilation_kernel", 0, ">= 1"));
        }
        if self.feather_kernel == 0 || self.feather_kernel % 2 == 0 {
            return Err(ShowroomError::config_value_error(
                "feather_kernel",
                self.feather_kernel,
                "odd, >= 1",
            ));
        }
        if self.jpeg_quality > 100 {
            return Err(ShowroomError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
            ));
        }
        if self.inpaint.request_jpeg_quality > 100 {
            return Err(ShowroomError::config_value_error(
                "request JPEG quality",
                self.inpaint.request_jpeg_quality,
                "0-100",
            ));
        }
        if self.inpaint.retry.max_attempts == 0 {
            return Err(ShowroomError::config_value_error("max_attempts", 0, ">= 1"));
        }
        if self.inpaint.model.trim().is_empty() {
            return Err(ShowroomError::invalid_config("inpaint model name is empty"));
        }
        let fraction = self.floor.force_bottom_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ShowroomError::config_value_error(
                "force_bottom_fraction",
                fraction,
                "0.0-1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.floor.polygon_epsilon_fraction) {
            return Err(ShowroomError::config_value_error(
                "polygon_epsilon_fraction",
                self.floor.polygon_epsilon_fraction,
                "0.0-1.0",
            ));
        }
        if self.floor.classes.is_empty() {
            return Err(ShowroomError::invalid_config("at least one floor class is required"));
        }
        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn process_max_dim(mut self, max_dim: u32) -> Self {
        self.config.process_max_dim = max_dim;
        self
    }

    #[must_use]
    pub fn analysis_max_dim(mut self, max_dim: u32) -> Self {
        self.config.analysis_max_dim = max_dim;
        self
    }

    #[must_use]
    pub fn dilation(mut self, kernel: u32, iterations: u32) -> Self {
        self.config.dilation_kernel = kernel;
        self.config.dilation_iterations = iterations;
        self
    }

    #[must_use]
    pub fn feather_kernel(mut self, kernel: u32) -> Self {
        self.config.feather_kernel = kernel;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(0, 100);
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn inpaint_model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.inpaint.model = model.into();
        self
    }

    #[must_use]
    pub fn instruction<S: Into<String>>(mut self, instruction: S) -> Self {
        self.config.inpaint.instruction = instruction.into();
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.inpaint.retry = retry;
        self
    }

    #[must_use]
    pub fn floor_output_mode(mut self, mode: FloorOutputMode) -> Self {
        self.config.floor.output_mode = mode;
        self
    }

    #[must_use]
    pub fn floor_classes(mut self, classes: Vec<u16>) -> Self {
        self.config.floor.classes = classes;
        self
    }

    #[must_use]
    pub fn closing_kernel(mut self, kernel: u32) -> Self {
        self.config.floor.closing_kernel = kernel;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.process_max_dim, 2048);
        assert_eq!(config.analysis_max_dim, 800);
        assert_eq!(config.inpaint.retry.max_attempts, 3);
        assert_eq!(config.inpaint.marker_color, [255, 0, 0]);
        assert_eq!(config.floor.classes, vec![3, 9, 27, 29]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feather_sigma_follows_kernel_size() {
        let config = RemovalConfig::default();
        assert!((config.feather_sigma() - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_builder_validation() {
        assert!(RemovalConfig::builder().process_max_dim(0).build().is_err());
        assert!(RemovalConfig::builder().feather_kernel(20).build().is_err());
        assert!(RemovalConfig::builder()
            .retry_policy(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            })
            .build()
            .is_err());
        assert!(RemovalConfig::builder().floor_classes(vec![]).build().is_err());

        let config = RemovalConfig::builder()
            .jpeg_quality(150)
            .floor_output_mode(FloorOutputMode::Both)
            .build()
            .unwrap();
        assert_eq!(config.jpeg_quality, 100);
        assert!(config.floor.output_mode.wants_overlay());
        assert!(config.floor.output_mode.wants_polygon());
    }

    #[test]
    fn test_manual_validation_failure() {
        let mut config = RemovalConfig::default();
        config.jpeg_quality = 101;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("JPEG quality"));
        assert!(error.to_string().contains("0-100"));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("CoreML".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert!("tpu".parse::<ExecutionProvider>().is_err());
        assert_eq!("boundary".parse::<FloorOutputMode>().unwrap(), FloorOutputMode::Polygon);
        assert!("none".parse::<FloorOutputMode>().is_err());
    }
}
