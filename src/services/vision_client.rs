//! Vision model client for identity document extraction.
//!
//! Talks to the OpenAI Responses API with a strict JSON schema. The
//! `VisionModel` trait is the seam the document processor depends on, so the
//! processor can be exercised without network access.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::documents::prompt::SCHEMA_NAME;

/// One extraction call: instructions, schema and the image itself.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub schema: Value,
    pub image_mime: String,
    pub image_base64: String,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision model request timed out")]
    Timeout,

    /// Non-success status. `message` is `None` when the body was empty.
    #[error("vision model returned status {status}")]
    Upstream { status: u16, message: Option<String> },

    #[error("vision model unavailable: {0}")]
    Transport(String),

    #[error("vision model returned a body that is not JSON: {0}")]
    InvalidBody(String),
}

/// External model able to read a document image.
pub trait VisionModel: Send + Sync {
    /// Returns the raw response body on success.
    fn extract(&self, request: VisionRequest) -> BoxFuture<'_, Result<Value, VisionError>>;
}

/// Client for the OpenAI Responses API.
#[derive(Clone)]
pub struct OpenAiVisionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

/// Error envelope returned by the API.
#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Longest raw upstream body echoed back as an error message.
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

impl OpenAiVisionClient {
    /// Create a new vision client.
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, model = model, "Vision client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(&self, request: &VisionRequest) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "input": [{
                "role": "user",
                "content": [
                    { "type": "input_text", "text": request.prompt },
                    {
                        "type": "input_image",
                        "image_url": format!("data:{};base64,{}", request.image_mime, request.image_base64),
                        "detail": "high"
                    }
                ]
            }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": SCHEMA_NAME,
                    "schema": request.schema,
                    "strict": true
                }
            }
        })
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn call(&self, request: VisionRequest) -> Result<Value, VisionError> {
        let url = format!("{}/v1/responses", self.base_url);
        debug!(url = %url, "Vision model request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout
                } else {
                    error!(error = %e, "Vision model request failed");
                    VisionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                VisionError::Timeout
            } else {
                VisionError::Transport(e.to_string())
            }
        })?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                error!(error = %e, "Failed to parse vision model response");
                VisionError::InvalidBody(e.to_string())
            });
        }

        let message = upstream_error_message(&body);
        error!(status = %status, message = ?message, "Vision model error");
        Err(VisionError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

impl VisionModel for OpenAiVisionClient {
    fn extract(&self, request: VisionRequest) -> BoxFuture<'_, Result<Value, VisionError>> {
        Box::pin(self.call(request))
    }
}

/// Best human-readable message from an error body. `None` for an empty body.
fn upstream_error_message(body: &[u8]) -> Option<String> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    if let Ok(parsed) = serde_json::from_slice::<OpenAiErrorResponse>(body) {
        if !parsed.error.message.trim().is_empty() {
            return Some(parsed.error.message);
        }
    }
    let text = String::from_utf8_lossy(body);
    Some(text.trim().chars().take(MAX_ERROR_MESSAGE_CHARS).collect())
}
