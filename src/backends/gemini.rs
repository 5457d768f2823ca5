//! REST client for the hosted Gemini generative models

use crate::{
    error::{Result, ServiceError, ShowroomError},
    inference::{GenerationRequest, GenerationResponse, GenerativeModel, RequestPart, ResponsePart},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `generateContent` client authenticated with an API key
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(180),
        }
    }

    /// Read `GEMINI_API_KEY` / `GOOGLE_API_KEY` and optionally `GEMINI_API_BASE`
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .ok_or_else(|| {
                ShowroomError::invalid_config("GEMINI_API_KEY or GOOGLE_API_KEY must be set")
            })?;
        let mut client = Self::new(api_key);
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            client = client.with_api_base(&base);
        }
        Ok(client)
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[must_use]
    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// JSON body for a `generateContent` call
    #[must_use]
    pub fn build_payload(request: &GenerationRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::Text(text) => json!({ "text": text }),
                RequestPart::InlineImage { mime_type, data } => json!({
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": STANDARD.encode(data),
                    }
                }),
            })
            .collect();
        let modalities: Vec<&str> = request.modalities.iter().map(|m| m.as_str()).collect();

        let mut payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "candidateCount": request.candidate_count,
                "responseModalities": modalities,
            },
        });
        if let (Some(instruction), Some(obj)) = (&request.system_instruction, payload.as_object_mut()) {
            obj.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }
        payload
    }

    /// Collect text and inline-image parts from every candidate
    pub fn parse_response(payload: &Value) -> std::result::Result<GenerationResponse, ServiceError> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut parts = Vec::new();
        for candidate in candidates {
            let candidate_parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in candidate_parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    parts.push(ResponsePart::Text(text.to_string()));
                    continue;
                }
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = STANDARD.decode(data.as_bytes()).map_err(|e| {
                    ServiceError::transient(format!("Gemini image base64 decode failed: {e}"))
                })?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png")
                    .to_string();
                parts.push(ResponsePart::Image {
                    mime_type,
                    data: bytes,
                });
            }
        }

        if parts.is_empty() {
            if let Some(reason) = payload
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str)
            {
                debug!(reason, "Gemini blocked the prompt");
            }
        }
        Ok(GenerationResponse::new(parts))
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ServiceError {
    if err.is_builder() {
        return ServiceError::fatal(format!("Gemini request could not be built: {err}"));
    }
    ServiceError::transient(format!("Gemini request failed: {err}"))
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ServiceError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::transient(format!("Gemini response body unreadable: {e}")))?;
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ServiceError::transient(format!("Gemini response was not JSON: {e}")))?;
        let parsed = Self::parse_response(&value)?;
        debug!(parts = parsed.parts.len(), "Gemini response parsed");
        Ok(parsed)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_for_model() {
        let client = GeminiClient::new("k").with_api_base("http://localhost:9/v1beta/");
        assert_eq!(
            client.endpoint_for_model("gemini-2.5-flash-image"),
            "http://localhost:9/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            client.endpoint_for_model("models/x"),
            "http://localhost:9/v1beta/models/x:generateContent"
        );
    }

    #[test]
    fn test_payload_shape() {
        let request = GenerationRequest::image_edit("m", vec![0xff, 0xd8], "remove");
        let payload = GeminiClient::build_payload(&request);
        assert_eq!(payload["generationConfig"]["candidateCount"], 1);
        assert_eq!(payload["generationConfig"]["responseModalities"][0], "IMAGE");
        assert_eq!(payload["contents"][0]["parts"][0]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(payload["contents"][0]["parts"][0]["inline_data"]["data"], "/9g=");
        assert_eq!(payload["contents"][0]["parts"][1]["text"], "remove");
        assert!(payload.get("systemInstruction").is_none());

        let described = GenerationRequest::describe_image("m", vec![], "be a curator".into(), "hi");
        let payload = GeminiClient::build_payload(&described);
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be a curator");
    }

    #[test]
    fn test_parse_response_accepts_both_spellings() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                    {"inline_data": {"mime_type": "image/jpeg", "data": "BAU="}}
                ]}
            }]
        });
        let response = GeminiClient::parse_response(&payload).unwrap();
        assert_eq!(response.parts.len(), 3);
        assert_eq!(response.first_image(), Some(&[1u8, 2, 3][..]));
        assert_eq!(response.text(), "here you go");
    }

    #[test]
    fn test_parse_response_without_candidates() {
        let payload = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let response = GeminiClient::parse_response(&payload).unwrap();
        assert!(response.parts.is_empty());

        let broken = json!({"candidates": [{"content": {"parts": [{"inlineData": {"data": "***"}}]}}]});
        assert!(GeminiClient::parse_response(&broken).is_err());
    }
}
