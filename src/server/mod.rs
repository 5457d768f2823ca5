//! HTTP surface
//!
//! - `GET /` health payload
//! - `POST /remove-object` multipart `file`, `x`, `y`
//! - `POST /analyze-image` multipart `file`
//! - `POST /consult` multipart `image`, optional `user_prompt`
//!
//! Errors are returned as `{"detail": "..."}` with the status chosen per endpoint.

mod routes;

use crate::{catalog::Curator, error::ShowroomError, processor::ObjectRemovalProcessor};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};

/// Request body limit for panorama uploads
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Services shared by every request; all read-only after startup
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<ObjectRemovalProcessor>,
    pub curator: Option<Arc<Curator>>,
    /// Base URL for absolute asset links; the request `Host` is used when unset
    pub public_url: Option<String>,
}

impl AppState {
    pub fn new(processor: Arc<ObjectRemovalProcessor>) -> Self {
        Self {
            processor,
            curator: None,
            public_url: None,
        }
    }

    #[must_use]
    pub fn with_curator(mut self, curator: Arc<Curator>) -> Self {
        self.curator = Some(curator);
        self
    }

    #[must_use]
    pub fn with_public_url<S: Into<String>>(mut self, url: S) -> Self {
        let url = url.into();
        self.public_url = Some(url.trim_end_matches('/').to_string());
        self
    }
}

/// Error rendered as `{"detail": ...}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, detail: S) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn internal<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl From<ShowroomError> for ApiError {
    fn from(err: ShowroomError) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), detail = %self.detail, "Request failed");
        } else {
            tracing::warn!(status = self.status.as_u16(), detail = %self.detail, "Request rejected");
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Tag every request with a fresh id, both in its span and in `x-request-id`
async fn request_id(request: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path()
    );
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Router with CORS, request tracing and the upload limit applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::health))
        .route("/remove-object", post(routes::remove_object))
        .route("/analyze-image", post(routes::analyze_image))
        .route("/consult", post(routes::consult))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
///
/// # Errors
/// - The address cannot be bound
/// - The server loop fails
pub async fn serve(state: AppState, addr: SocketAddr) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Showroom server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await?;
    Ok(())
}
