//! Showroom CLI
//!
//! Runs the HTTP server, or the removal and floor pipelines on local files.

use super::config::{BackendArgs, CliConfigBuilder};
use crate::{
    catalog::{Curator, FurnitureCatalog, DEFAULT_CONSULT_MODEL},
    config::{ExecutionProvider, FloorOutputMode},
    download::{default_model_dir, ModelArtifact, ModelDownloader},
    server::{self, AppState},
    services::ImageIOService,
    tracing_config::{spans, TracingConfig, TracingFormat},
    types::ClickPoint,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn, Instrument};

/// Object removal and floor analysis for panoramic room photos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "showroom")]
pub struct Cli {
    /// Verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log format (console, compact, json)
    #[arg(long, default_value = "console", global = true)]
    pub log_format: TracingFormat,

    /// Execution provider for the segmentation models (auto, cpu, cuda, coreml)
    #[arg(short, long, env = "SHOWROOM_EXECUTION_PROVIDER", default_value = "auto", global = true)]
    pub execution_provider: ExecutionProvider,

    /// Longest side of the frame sent to segmentation and generation
    #[arg(long, env = "SHOWROOM_PROCESS_MAX_DIM", default_value_t = 2048, global = true)]
    pub process_max_dim: u32,

    /// Floor presentation (overlay, polygon, both)
    #[arg(long, env = "SHOWROOM_FLOOR_OUTPUT", default_value = "overlay", global = true)]
    pub floor_output: FloorOutputMode,

    #[command(flatten)]
    pub backends: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, env = "SHOWROOM_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,

        /// Furniture catalog JSON
        #[arg(long, env = "SHOWROOM_CATALOG", default_value = "furniture_db.json")]
        catalog: PathBuf,

        /// Public base URL used for absolute 3D asset links
        #[arg(long, env = "SHOWROOM_PUBLIC_URL")]
        public_url: Option<String>,

        /// Model used for furniture recommendations
        #[arg(long, env = "SHOWROOM_CONSULT_MODEL", default_value = DEFAULT_CONSULT_MODEL)]
        consult_model: String,
    },

    /// Remove the object at (x, y) from a local image
    Remove {
        input: PathBuf,
        x: i64,
        y: i64,

        /// Output JPEG [default: <input>_removed.jpg]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the floor analysis of the result as JSON
        #[arg(long, value_name = "PATH")]
        floor_json: Option<PathBuf>,
    },

    /// Detect the floor of a local image
    Analyze {
        input: PathBuf,

        /// Write the overlay as PNG
        #[arg(long, value_name = "PATH")]
        overlay_png: Option<PathBuf>,

        /// Write the floor fields as JSON instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download model artifacts into the cache directory
    FetchModels {
        /// Artifacts as NAME=URL[,sha256=HEX]
        #[arg(required = true, value_name = "NAME=URL")]
        artifacts: Vec<ModelArtifact>,

        /// Target directory [default: user cache dir]
        #[arg(long, value_name = "PATH")]
        model_dir: Option<PathBuf>,

        /// Hide download progress bars
        #[arg(long)]
        quiet: bool,
    },

    /// Show execution provider availability
    Providers,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format)
        .init()
        .context("Failed to initialize tracing")?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = spans::session(&session_id, command_name(&cli.command));
    run(&cli).instrument(span).await
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Serve {
            bind,
            catalog,
            public_url,
            consult_model,
        } => serve(cli, *bind, catalog, public_url.as_deref(), consult_model).await,
        Command::Remove {
            input,
            x,
            y,
            output,
            floor_json,
        } => remove(cli, input, *x, *y, output.as_deref(), floor_json.as_deref()).await,
        Command::Analyze {
            input,
            overlay_png,
            output,
        } => analyze(cli, input, overlay_png.as_deref(), output.as_deref()).await,
        Command::FetchModels {
            artifacts,
            model_dir,
            quiet,
        } => fetch_models(artifacts, model_dir.clone(), !quiet).await,
        Command::Providers => {
            show_providers();
            Ok(())
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Serve { .. } => "serve",
        Command::Remove { .. } => "remove",
        Command::Analyze { .. } => "analyze",
        Command::FetchModels { .. } => "fetch-models",
        Command::Providers => "providers",
    }
}

async fn serve(
    cli: &Cli,
    bind: SocketAddr,
    catalog_path: &Path,
    public_url: Option<&str>,
    consult_model: &str,
) -> Result<()> {
    let config = CliConfigBuilder::removal_config(cli)?;
    let generator = CliConfigBuilder::generative_model(&cli.backends)?;
    let processor = CliConfigBuilder::processor(cli, config, Arc::clone(&generator), true)?;

    let catalog = Arc::new(FurnitureCatalog::load(catalog_path).context("Failed to load furniture catalog")?);
    let curator = Curator::new(generator, catalog).with_model_name(consult_model);

    let mut state = AppState::new(Arc::new(processor)).with_curator(Arc::new(curator));
    if let Some(url) = public_url {
        state = state.with_public_url(url);
    }
    server::serve(state, bind).await.context("Server failed")
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    input.with_file_name(format!("{stem}_removed.jpg"))
}

async fn remove(
    cli: &Cli,
    input: &Path,
    x: i64,
    y: i64,
    output: Option<&Path>,
    floor_json: Option<&Path>,
) -> Result<()> {
    let config = CliConfigBuilder::removal_config(cli)?;
    let quality = config.jpeg_quality;
    let mode = config.floor.output_mode;
    let generator = CliConfigBuilder::generative_model(&cli.backends)?;
    let processor = CliConfigBuilder::processor(cli, config, generator, floor_json.is_some())?;

    let image = ImageIOService::load_image(input).with_context(|| format!("Failed to load {}", input.display()))?;
    let click = ClickPoint::from_signed(x, y, image.width(), image.height())?;

    let bar = spinner("Removing object");
    let result = processor.remove_object(Arc::new(image), click).await;
    bar.finish_and_clear();
    let output_data = result.context("Object removal failed")?;

    let output_path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
    let jpeg = ImageIOService::encode_jpeg(&output_data.result.image, quality)?;
    ImageIOService::save_bytes(&jpeg, &output_path)?;
    info!(
        output = %output_path.display(),
        attempts = output_data.attempts,
        total_ms = output_data.result.timings.total_ms(),
        "Wrote edited image"
    );
    println!("{}", output_path.display());

    if let (Some(path), Some(outcome)) = (floor_json, output_data.floor.as_ref()) {
        let json = serde_json::to_vec_pretty(&outcome.presentation(mode))?;
        ImageIOService::save_bytes(&json, path)?;
    }
    Ok(())
}

async fn analyze(cli: &Cli, input: &Path, overlay_png: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let mut config = CliConfigBuilder::removal_config(cli)?;
    if overlay_png.is_some() && !config.floor.output_mode.wants_overlay() {
        config.floor.output_mode = FloorOutputMode::Both;
    }
    let mode = config.floor.output_mode;
    let detector = CliConfigBuilder::floor_detector(cli, &config)?;

    let image = ImageIOService::load_image(input).with_context(|| format!("Failed to load {}", input.display()))?;
    let bar = spinner("Detecting floor");
    let outcome = crate::processor::run_floor_detection(detector, image).await;
    bar.finish_and_clear();
    let outcome = outcome?;
    if !outcome.is_detected() {
        warn!(?outcome, "No floor product available");
    }

    if let Some(path) = overlay_png {
        let uri = outcome.mask_image();
        if uri.is_empty() {
            warn!("No overlay to write");
        } else {
            ImageIOService::save_bytes(&ImageIOService::decode_data_uri(&uri)?, path)?;
            info!(path = %path.display(), "Wrote floor overlay");
        }
    }

    let json = serde_json::to_string_pretty(&outcome.presentation(mode))?;
    match output {
        Some(path) => ImageIOService::save_bytes(json.as_bytes(), path)?,
        None => println!("{json}"),
    }
    Ok(())
}

async fn fetch_models(artifacts: &[ModelArtifact], model_dir: Option<PathBuf>, show_progress: bool) -> Result<()> {
    let dir = model_dir.unwrap_or_else(default_model_dir);
    let downloader = ModelDownloader::with_model_dir(&dir)?;
    info!(dir = %dir.display(), count = artifacts.len(), "Fetching model artifacts");
    for path in downloader.fetch_all(artifacts, show_progress).await? {
        println!("{}", path.display());
    }
    Ok(())
}

fn show_providers() {
    #[cfg(feature = "onnx")]
    {
        println!("Execution providers:");
        for (name, available) in crate::backends::onnx::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name}: {status}");
        }
    }
    #[cfg(not(feature = "onnx"))]
    println!("Built without the onnx feature; no execution providers are available");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remove_command() {
        let cli = Cli::try_parse_from([
            "showroom",
            "-vv",
            "--floor-output",
            "both",
            "remove",
            "room.jpg",
            "2000",
            "1000",
            "--floor-json",
            "floor.json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.floor_output, FloorOutputMode::Both);
        match cli.command {
            Command::Remove { x, y, floor_json, .. } => {
                assert_eq!((x, y), (2000, 1000));
                assert_eq!(floor_json, Some(PathBuf::from("floor.json")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_fetch_models() {
        let cli = Cli::try_parse_from([
            "showroom",
            "fetch-models",
            "enc.onnx=https://example.com/enc.onnx",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::FetchModels { ref artifacts, .. } if artifacts.len() == 1));
        assert!(Cli::try_parse_from(["showroom", "fetch-models", "bogus"]).is_err());
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/room.png")),
            PathBuf::from("/tmp/room_removed.jpg")
        );
    }
}
