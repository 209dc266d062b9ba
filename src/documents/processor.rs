//! Server side of document processing.
//!
//! Validates an upload, asks the vision model for a structured extraction and
//! turns its answer into a `ProcessedDocumentPayload`. Every failure comes
//! back as a `DocumentError` with a stable reason.

use base64::Engine as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::domain::{DocumentType, ProcessedDocumentPayload};
use crate::error::{DocumentError, DocumentResult};
use crate::services::vision_client::{VisionError, VisionModel, VisionRequest};

use super::normalize::{decode_model_output, extract_output_text, ModelExtraction};
use super::prompt::{build_prompt, extraction_schema};
use super::rules::eid_validation;

/// Upload size ceiling shared by the proxy and its client.
pub const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Hard deadline for one upstream model call.
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(30);

/// A file received from the multipart form.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct DocumentProcessor {
    /// `None` when no model credential is configured.
    model: Option<Arc<dyn VisionModel>>,
    max_upload_bytes: usize,
    model_timeout: Duration,
}

impl DocumentProcessor {
    pub fn new(model: Option<Arc<dyn VisionModel>>) -> Self {
        Self {
            model,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            model_timeout: MODEL_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, max_upload_bytes: usize, model_timeout: Duration) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self.model_timeout = model_timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.model.is_some()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate the upload and run the extraction.
    ///
    /// Checks run in a fixed order and the first failure wins, so no model
    /// call is made for a request that fails any of them.
    #[instrument(skip(self, file))]
    pub async fn process(
        &self,
        document_type: Option<&str>,
        file: Option<UploadedImage>,
    ) -> DocumentResult<ProcessedDocumentPayload> {
        let document_type = document_type
            .and_then(DocumentType::parse)
            .ok_or_else(DocumentError::invalid_document_type)?;

        let file = file
            .filter(|f| !f.bytes.is_empty())
            .ok_or_else(DocumentError::file_required)?;

        let mime = file
            .content_type
            .as_deref()
            .map(|m| m.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !mime.starts_with("image/") {
            return Err(DocumentError::unsupported_file_type(&mime));
        }

        if file.bytes.len() > self.max_upload_bytes {
            return Err(DocumentError::file_too_large(self.max_upload_bytes));
        }

        let model = self.model.as_ref().ok_or_else(DocumentError::not_configured)?;
        debug!(file_name = ?file.file_name, size = file.bytes.len(), "Upload accepted");

        let request = VisionRequest {
            prompt: build_prompt(document_type),
            schema: extraction_schema(),
            image_mime: mime,
            image_base64: base64::engine::general_purpose::STANDARD.encode(&file.bytes),
        };

        let started = Instant::now();
        let response = match tokio::time::timeout(self.model_timeout, model.extract(request)).await {
            Ok(result) => result.map_err(map_vision_error)?,
            Err(_) => {
                warn!(timeout_secs = self.model_timeout.as_secs(), "Vision model call timed out");
                return Err(DocumentError::timeout());
            }
        };

        let extraction = extract_output_text(&response)
            .as_deref()
            .and_then(decode_model_output)
            .ok_or_else(|| {
                warn!(%document_type, "Vision model answer could not be decoded");
                DocumentError::invalid_response()
            })?;

        let payload = build_payload(document_type, extraction)?;

        info!(
            %document_type,
            confidence = payload.confidence_score,
            starts_with_784 = payload.validation.starts_with_784,
            duration_ms = started.elapsed().as_millis() as u64,
            "Document processed"
        );

        Ok(payload)
    }
}

fn map_vision_error(err: VisionError) -> DocumentError {
    match err {
        VisionError::Timeout => DocumentError::timeout(),
        VisionError::Upstream { status, message } => DocumentError::upstream(status, message),
        VisionError::Transport(_) => DocumentError::upstream(502, None),
        VisionError::InvalidBody(_) => DocumentError::invalid_response(),
    }
}

/// Apply document-type validation to a decoded extraction.
///
/// A payload without a usable preview image is never returned.
pub fn build_payload(
    document_type: DocumentType,
    extraction: ModelExtraction,
) -> DocumentResult<ProcessedDocumentPayload> {
    if extraction.cropped_image_base64.is_empty() {
        return Err(DocumentError::invalid_response());
    }

    let validation = eid_validation(
        document_type,
        &extraction.extracted_data.document_number,
        extraction.model_says_valid_eid,
    );

    Ok(ProcessedDocumentPayload {
        document_type,
        extracted_data: extraction.extracted_data,
        validation,
        cropped_document_image_base64: extraction.cropped_image_base64,
        confidence_score: extraction.confidence_score,
    })
}
