//! Request handlers

use super::{ApiError, AppState};
use crate::{
    catalog::Recommendation,
    config::FloorOutputMode,
    error::ShowroomError,
    services::ImageIOService,
    types::{ClickPoint, FloorOutcome, FloorProduct},
};
use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap},
    Json,
};
use image::RgbImage;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Floor product fields for the configured output mode; no detector renders as not found
fn floor_fields(mode: FloorOutputMode, outcome: Option<&FloorOutcome>) -> FloorProduct {
    outcome.map_or_else(
        || FloorOutcome::NotFound.presentation(mode),
        |outcome| outcome.presentation(mode),
    )
}

#[derive(Debug, Serialize)]
pub(super) struct RemoveObjectResponse {
    status: &'static str,
    image: String,
    #[serde(flatten)]
    floor: FloorProduct,
}

#[derive(Debug, Serialize)]
pub(super) struct AnalyzeResponse {
    status: &'static str,
    #[serde(flatten)]
    floor: FloorProduct,
}

/// Multipart upload split into file parts and text fields
#[derive(Debug, Default)]
struct Form {
    files: HashMap<String, Vec<u8>>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read '{name}': {e}")))?;
                form.files.insert(name, bytes.to_vec());
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read '{name}': {e}")))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// File part, or a text part when the client did not send a filename
    fn take_file(&mut self, name: &str) -> Result<Vec<u8>, ApiError> {
        self.files
            .remove(name)
            .or_else(|| self.fields.remove(name).map(String::into_bytes))
            .ok_or_else(|| ApiError::bad_request(format!("missing required field '{name}'")))
    }

    fn integer(&self, name: &str) -> Result<i64, ApiError> {
        let raw = self
            .fields
            .get(name)
            .ok_or_else(|| ApiError::bad_request(format!("missing required field '{name}'")))?;
        raw.trim()
            .parse()
            .map_err(|_| ApiError::bad_request(format!("field '{name}' must be an integer, got '{raw}'")))
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

async fn decode(bytes: Vec<u8>) -> Result<RgbImage, ShowroomError> {
    tokio::task::spawn_blocking(move || ImageIOService::load_from_bytes(&bytes)).await?
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Showroom object removal server running",
    })
}

/// Remove the object under the click and return the edited image
///
/// An undecodable upload is reported as 500 on this endpoint.
pub(super) async fn remove_object(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RemoveObjectResponse>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let bytes = form.take_file("file")?;
    let x = form.integer("x")?;
    let y = form.integer("y")?;

    let image = decode(bytes)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let (width, height) = image.dimensions();
    let click = ClickPoint::from_signed(x, y, width, height)?;
    info!(width, height, x, y, "Object removal requested");

    let output = state.processor.remove_object(Arc::new(image), click).await?;
    let quality = state.processor.config().jpeg_quality;
    let result_image = output.result.image;
    let data_uri = tokio::task::spawn_blocking(move || ImageIOService::jpeg_data_uri(&result_image, quality))
        .await
        .map_err(ShowroomError::from)??;

    let mode = state.processor.config().floor.output_mode;
    Ok(Json(RemoveObjectResponse {
        status: "success",
        image: data_uri,
        floor: floor_fields(mode, output.floor.as_ref()),
    }))
}

/// Floor overlay and/or polygon for an uploaded room photo
pub(super) async fn analyze_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let bytes = form.take_file("file")?;
    let image = decode(bytes).await?;
    debug!(width = image.width(), height = image.height(), "Floor analysis requested");

    let outcome = state.processor.analyze_floor(image).await?;
    Ok(Json(AnalyzeResponse {
        status: "success",
        floor: floor_fields(state.processor.config().floor.output_mode, Some(&outcome)),
    }))
}

/// Furniture recommendations; generative or parse failures yield `[]`
pub(super) async fn consult(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Vec<Recommendation>>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let image = form.take_file("image")?;
    let user_prompt = form.text("user_prompt").map(str::to_string);

    let Some(curator) = state.curator.as_ref() else {
        return Err(ApiError::internal("recommendations are not configured"));
    };
    let base_url = state
        .public_url
        .clone()
        .unwrap_or_else(|| base_url_from_headers(&headers));
    let outcome = curator.consult(image, user_prompt.as_deref(), &base_url).await;
    Ok(Json(outcome.into_recommendations()))
}

/// `scheme://host` as seen by the client
fn base_url_from_headers(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_floor_fields_follow_mode() {
        let outcome = FloorOutcome::NotFound;
        let overlay = serde_json::to_value(floor_fields(FloorOutputMode::Overlay, Some(&outcome))).unwrap();
        assert_eq!(overlay, serde_json::json!({"mask_image": ""}));

        let polygon = serde_json::to_value(floor_fields(FloorOutputMode::Polygon, None)).unwrap();
        assert_eq!(polygon, serde_json::json!({"floor_boundary": []}));

        let both = serde_json::to_value(floor_fields(FloorOutputMode::Both, None)).unwrap();
        assert_eq!(both, serde_json::json!({"mask_image": "", "floor_boundary": []}));
    }

    #[test]
    fn test_base_url_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(base_url_from_headers(&headers), "http://localhost");
        headers.insert(header::HOST, HeaderValue::from_static("api.local:8000"));
        assert_eq!(base_url_from_headers(&headers), "http://api.local:8000");
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("showroom.example"));
        assert_eq!(base_url_from_headers(&headers), "https://showroom.example");
    }
}
