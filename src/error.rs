//! Error types for object removal, floor detection and recommendation operations

use thiserror::Error;

/// Result type alias for showroom operations
pub type Result<T> = std::result::Result<T, ShowroomError>;

/// Classification of a failure reported by an external model service
///
/// The retry policy of the inpainting client is driven by this value, never by
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Quota exhausted or rate limited; expected to clear after a longer cooldown
    RateLimited,
    /// Network hiccup, server-side error or unusable response body
    Transient,
    /// Request rejected in a way that waiting cannot fix (bad key, malformed request)
    Fatal,
}

impl ServiceErrorKind {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Typed failure returned by a service-client abstraction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} service failure: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new<S: Into<String>>(kind: ServiceErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::new(ServiceErrorKind::RateLimited, message)
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::new(ServiceErrorKind::Transient, message)
    }

    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::new(ServiceErrorKind::Fatal, message)
    }

    /// Classify an HTTP status code returned by a model service
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 512));
        match status {
            429 => Self::rate_limited(message),
            408 | 500..=599 => Self::transient(message),
            _ => Self::fatal(message),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Error types for showroom operations
#[derive(Error, Debug)]
pub enum ShowroomError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Caller supplied an unusable request (undecodable image, missing field, point out of bounds)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External generative service failed after the retry budget was spent
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Promptable or semantic segmentation backend failure
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Pixel pipeline errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Download or transport failures outside the generative service
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShowroomError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str) -> Self {
        Self::Processing(format!("Processing failed at stage '{}': {}", stage, details))
    }

    /// HTTP status code a request handler should report for this error
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            _ => 500,
        }
    }
}

impl From<tokio::task::JoinError> for ShowroomError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("worker task failed: {err}"))
    }
}
