//! Conversion of CLI arguments into configuration and backends

use crate::cli::main_impl::Cli;
use crate::{
    backends::GeminiClient,
    config::{RemovalConfig, DEFAULT_INPAINT_MODEL},
    download::default_model_dir,
    floor::FloorDetector,
    inference::{GenerativeModel, PromptSegmenter, SemanticSegmenter},
    processor::ObjectRemovalProcessor,
};
use anyhow::{Context, Result};
use clap::Args;
use std::{path::PathBuf, sync::Arc};

pub(crate) const DEFAULT_SAM_ENCODER_FILE: &str = "sam_encoder.onnx";
pub(crate) const DEFAULT_SAM_DECODER_FILE: &str = "sam_decoder.onnx";
pub(crate) const DEFAULT_SEG_MODEL_FILE: &str = "ade20k_segmentation.onnx";

/// Model locations and generative service credentials
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Gemini API key (falls back to GOOGLE_API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Override of the Gemini REST base URL
    #[arg(long, env = "GEMINI_API_BASE", global = true)]
    pub api_base: Option<String>,

    /// Image model used for inpainting
    #[arg(long, env = "SHOWROOM_INPAINT_MODEL", default_value = DEFAULT_INPAINT_MODEL, global = true)]
    pub inpaint_model: String,

    /// SAM image encoder [default: <model dir>/sam_encoder.onnx]
    #[arg(long, env = "SHOWROOM_SAM_ENCODER", value_name = "PATH", global = true)]
    pub sam_encoder: Option<PathBuf>,

    /// SAM prompt decoder [default: <model dir>/sam_decoder.onnx]
    #[arg(long, env = "SHOWROOM_SAM_DECODER", value_name = "PATH", global = true)]
    pub sam_decoder: Option<PathBuf>,

    /// ADE20K semantic segmentation model [default: <model dir>/ade20k_segmentation.onnx]
    #[arg(long, env = "SHOWROOM_SEG_MODEL", value_name = "PATH", global = true)]
    pub seg_model: Option<PathBuf>,
}

impl BackendArgs {
    fn model_path(explicit: Option<&PathBuf>, default_file: &str) -> PathBuf {
        explicit
            .cloned()
            .unwrap_or_else(|| default_model_dir().join(default_file))
    }

    pub(crate) fn sam_encoder_path(&self) -> PathBuf {
        Self::model_path(self.sam_encoder.as_ref(), DEFAULT_SAM_ENCODER_FILE)
    }

    pub(crate) fn sam_decoder_path(&self) -> PathBuf {
        Self::model_path(self.sam_decoder.as_ref(), DEFAULT_SAM_DECODER_FILE)
    }

    pub(crate) fn seg_model_path(&self) -> PathBuf {
        Self::model_path(self.seg_model.as_ref(), DEFAULT_SEG_MODEL_FILE)
    }
}

/// Builds configuration and backends from parsed arguments
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn removal_config(cli: &Cli) -> Result<RemovalConfig> {
        RemovalConfig::builder()
            .process_max_dim(cli.process_max_dim)
            .execution_provider(cli.execution_provider)
            .floor_output_mode(cli.floor_output)
            .inpaint_model(cli.backends.inpaint_model.as_str())
            .build()
            .context("Invalid configuration")
    }

    pub(crate) fn generative_model(args: &BackendArgs) -> Result<Arc<dyn GenerativeModel>> {
        let client = match args.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => GeminiClient::new(key),
            None => GeminiClient::from_env().context("No Gemini API key configured")?,
        };
        let client = match args.api_base.as_deref() {
            Some(base) => client.with_api_base(base),
            None => client,
        };
        Ok(Arc::new(client))
    }

    #[cfg(feature = "onnx")]
    pub(crate) fn prompt_segmenter(cli: &Cli) -> Result<Arc<dyn PromptSegmenter>> {
        let encoder = cli.backends.sam_encoder_path();
        let decoder = cli.backends.sam_decoder_path();
        let segmenter = crate::backends::SamSegmenter::load(&encoder, &decoder, cli.execution_provider)
            .with_context(|| {
                format!(
                    "Failed to load SAM from {} and {}",
                    encoder.display(),
                    decoder.display()
                )
            })?;
        Ok(Arc::new(segmenter))
    }

    #[cfg(not(feature = "onnx"))]
    pub(crate) fn prompt_segmenter(_cli: &Cli) -> Result<Arc<dyn PromptSegmenter>> {
        anyhow::bail!("Promptable segmentation requires the onnx feature")
    }

    #[cfg(feature = "onnx")]
    pub(crate) fn semantic_segmenter(cli: &Cli) -> Result<Arc<dyn SemanticSegmenter>> {
        let path = cli.backends.seg_model_path();
        let segmenter = crate::backends::AdeSegmenter::load(&path, cli.execution_provider)
            .with_context(|| format!("Failed to load segmentation model {}", path.display()))?;
        Ok(Arc::new(segmenter))
    }

    #[cfg(not(feature = "onnx"))]
    pub(crate) fn semantic_segmenter(_cli: &Cli) -> Result<Arc<dyn SemanticSegmenter>> {
        anyhow::bail!("Floor detection requires the onnx feature")
    }

    pub(crate) fn floor_detector(cli: &Cli, config: &RemovalConfig) -> Result<Arc<FloorDetector>> {
        Ok(Arc::new(FloorDetector::new(
            Self::semantic_segmenter(cli)?,
            config.floor.clone(),
            config.analysis_max_dim,
        )))
    }

    pub(crate) fn processor(
        cli: &Cli,
        config: RemovalConfig,
        generator: Arc<dyn GenerativeModel>,
        with_floor: bool,
    ) -> Result<ObjectRemovalProcessor> {
        let detector = if with_floor {
            Some(Self::floor_detector(cli, &config)?)
        } else {
            None
        };
        let processor = ObjectRemovalProcessor::new(config, Self::prompt_segmenter(cli)?, generator)?;
        Ok(match detector {
            Some(detector) => processor.with_floor_detector(detector),
            None => processor,
        })
    }
}
