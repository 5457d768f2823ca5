//! Model artifact downloading
//!
//! Artifacts (ONNX weights for the segmentation backends) are fetched by URL into
//! the per-user cache directory, streamed to a temporary file, optionally checked
//! against a SHA-256 digest, and moved into place. Files already present are reused.

use crate::error::{Result, ShowroomError};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

/// A downloadable model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Local file name inside the cache directory
    pub file_name: String,
    pub url: String,
    /// Lowercase hex digest
    pub sha256: Option<String>,
}

impl ModelArtifact {
    pub fn new<S: Into<String>, U: Into<String>>(file_name: S, url: U) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256(mut self, digest: &str) -> Self {
        self.sha256 = Some(digest.trim().to_ascii_lowercase());
        self
    }
}

/// `file_name=url` with an optional `,sha256=<hex>` suffix
impl FromStr for ModelArtifact {
    type Err = ShowroomError;

    fn from_str(spec: &str) -> Result<Self> {
        let (file_name, rest) = spec.split_once('=').ok_or_else(|| {
            ShowroomError::invalid_config(format!("artifact '{spec}' must look like name=url"))
        })?;
        let (url, digest) = match rest.rsplit_once(",sha256=") {
            Some((url, digest)) => (url, Some(digest)),
            None => (rest, None),
        };
        let file_name = file_name.trim();
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(ShowroomError::invalid_config(format!(
                "artifact name '{file_name}' must be a plain file name"
            )));
        }
        validate_artifact_url(url.trim())?;
        let artifact = Self::new(file_name, url.trim());
        Ok(match digest {
            Some(digest) if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) => {
                artifact.with_sha256(digest)
            }
            Some(digest) => {
                return Err(ShowroomError::invalid_config(format!(
                    "'{digest}' is not a SHA-256 hex digest"
                )))
            }
            None => artifact,
        })
    }
}

/// Only http(s) URLs are fetched
pub fn validate_artifact_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ShowroomError::invalid_config("artifact URL cannot be empty"));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ShowroomError::invalid_config(format!(
            "unsupported artifact URL: {url} (expected http:// or https://)"
        )));
    }
    Ok(())
}

/// Default cache location: `<user cache dir>/showroom/models`
#[must_use]
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("showroom")
        .join("models")
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    fn create(enabled: bool) -> Self {
        #[cfg(feature = "cli")]
        if enabled {
            let bar = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            return Self::Indicatif(bar);
        }
        Self::NoOp
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {}
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {}
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {}
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {}
        }
    }
}

/// Fetches model artifacts into a cache directory
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    model_dir: PathBuf,
}

impl ModelDownloader {
    /// Downloader targeting [`default_model_dir`]
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Self::with_model_dir(default_model_dir())
    }

    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_model_dir<P: Into<PathBuf>>(model_dir: P) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| ShowroomError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            model_dir: model_dir.into(),
        })
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    #[must_use]
    pub fn artifact_path(&self, artifact: &ModelArtifact) -> PathBuf {
        self.model_dir.join(&artifact.file_name)
    }

    /// Present on disk and, when a digest is known, matching it
    ///
    /// # Errors
    /// - File read failures during verification
    pub fn is_cached(&self, artifact: &ModelArtifact) -> Result<bool> {
        let path = self.artifact_path(artifact);
        if !path.is_file() {
            return Ok(false);
        }
        verify_file_integrity(&path, artifact.sha256.as_deref())
    }

    /// Download `artifact` unless a valid copy is already cached; returns its path
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors
    /// - Digest mismatch after download
    #[instrument(skip(self), fields(file = %artifact.file_name))]
    pub async fn fetch(&self, artifact: &ModelArtifact, show_progress: bool) -> Result<PathBuf> {
        let final_path = self.artifact_path(artifact);
        if self.is_cached(artifact)? {
            info!(path = %final_path.display(), "Model artifact already cached");
            return Ok(final_path);
        }

        fs::create_dir_all(&self.model_dir)
            .map_err(|e| ShowroomError::file_io_error("create model directory", &self.model_dir, &e))?;
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.model_dir)
            .map_err(|e| ShowroomError::file_io_error("create temporary file", &self.model_dir, &e))?;

        let progress = ProgressIndicator::create(show_progress);
        progress.set_message(format!("Downloading {}", artifact.file_name));
        let downloaded = match self.stream_to(&artifact.url, temp.path(), &progress).await {
            Ok(bytes) => bytes,
            Err(e) => {
                progress.finish_with_message(format!("Download of {} failed", artifact.file_name));
                return Err(e);
            }
        };

        if !verify_file_integrity(temp.path(), artifact.sha256.as_deref())? {
            progress.finish_with_message(format!("{} failed verification", artifact.file_name));
            return Err(ShowroomError::network(format!(
                "SHA-256 mismatch for {} downloaded from {}",
                artifact.file_name, artifact.url
            )));
        }

        temp.persist(&final_path)
            .map_err(|e| ShowroomError::file_io_error("move downloaded artifact", &final_path, &e.error))?;
        progress.finish_with_message(format!("Downloaded {}", artifact.file_name));
        info!(bytes = downloaded, path = %final_path.display(), "Model artifact downloaded");
        Ok(final_path)
    }

    /// Fetch every artifact in order, stopping at the first failure
    ///
    /// # Errors
    /// - The first failing [`Self::fetch`]
    pub async fn fetch_all(&self, artifacts: &[ModelArtifact], show_progress: bool) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            paths.push(self.fetch(artifact, show_progress).await?);
        }
        Ok(paths)
    }

    async fn stream_to(&self, url: &str, path: &Path, progress: &ProgressIndicator) -> Result<u64> {
        debug!(url, path = %path.display(), "Starting download");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ShowroomError::network(format!("failed to download {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ShowroomError::network(format!(
                "HTTP {} for {url}",
                response.status()
            )));
        }
        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ShowroomError::file_io_error("create file", path, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| ShowroomError::network(format!("download stream failed: {e}")))?;
            if read == 0 {
                break;
            }
            file.write_all(buffer.get(..read).unwrap_or_default())
                .await
                .map_err(|e| ShowroomError::file_io_error("write to file", path, &e))?;
            downloaded += read as u64;
            progress.set_position(downloaded);
        }
        file.flush()
            .await
            .map_err(|e| ShowroomError::file_io_error("flush file", path, &e))?;
        Ok(downloaded)
    }
}

/// Compare a file's SHA-256 with `expected`; no digest means nothing to check
///
/// # Errors
/// - File read failures
pub fn verify_file_integrity(path: &Path, expected: Option<&str>) -> Result<bool> {
    let Some(expected) = expected else {
        return Ok(true);
    };
    let mut file =
        fs::File::open(path).map_err(|e| ShowroomError::file_io_error("open file for verification", path, &e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| ShowroomError::file_io_error("read file for verification", path, &e))?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or_default());
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        warn!(path = %path.display(), expected, actual, "File integrity check failed");
        Ok(false)
    }
}
