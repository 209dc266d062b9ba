//! Unified API error handling
//!
//! Every document processing failure leaves the server as a
//! `ProcessedDocumentErrorPayload` with a stable `reason`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::domain::{ErrorReason, ProcessedDocumentErrorPayload};

/// Message used when the upstream model failed without explaining why.
pub const MSG_RECAPTURE: &str = "Document not clear. Please recapture.";

#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct DocumentError {
    pub reason: ErrorReason,
    pub message: String,
    /// Overrides the reason's default status (upstream failures).
    pub status: Option<u16>,
    pub error_id: Option<String>,
}

impl DocumentError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            status: None,
            error_id: None,
        }
    }

    pub fn invalid_document_type() -> Self {
        Self::new(
            ErrorReason::InvalidDocumentType,
            "documentType must be one of PASSPORT, EID_FRONT or EID_BACK.",
        )
    }

    pub fn file_required() -> Self {
        Self::new(ErrorReason::FileRequired, "An image file is required.")
    }

    pub fn unsupported_file_type(mime: &str) -> Self {
        Self::new(
            ErrorReason::UnsupportedFileType,
            format!("Unsupported file type '{}'. Please upload an image.", mime),
        )
    }

    pub fn file_too_large(max_bytes: usize) -> Self {
        Self::new(
            ErrorReason::FileTooLarge,
            format!("File too large. Maximum {}MB.", max_bytes / (1024 * 1024)),
        )
    }

    pub fn not_configured() -> Self {
        Self::new(
            ErrorReason::DocumentNotConfigured,
            "Document processing is not configured.",
        )
    }

    pub fn invalid_response() -> Self {
        Self::new(ErrorReason::InvalidOpenaiResponse, MSG_RECAPTURE)
    }

    pub fn timeout() -> Self {
        Self::new(
            ErrorReason::Timeout,
            "Document processing timed out. Please try again.",
        )
    }

    /// Upstream model call failed with a non-success status.
    pub fn upstream(status: u16, message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| MSG_RECAPTURE.to_string());
        Self {
            status: Some(status),
            ..Self::new(ErrorReason::OpenaiRequestFailed, message)
        }
    }

    pub fn with_error_id(mut self, error_id: Option<String>) -> Self {
        if self.error_id.is_none() {
            self.error_id = error_id;
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or_else(|| {
                StatusCode::from_u16(self.reason.default_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            })
    }

    pub fn to_payload(&self) -> ProcessedDocumentErrorPayload {
        ProcessedDocumentErrorPayload {
            error: true,
            message: self.message.clone(),
            confidence_score: 0.0,
            reason: Some(self.reason),
            retryable: Some(self.reason.is_retryable()),
            error_id: self.error_id.clone(),
        }
    }
}

impl IntoResponse for DocumentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                reason = %self.reason,
                status = status.as_u16(),
                error_id = ?self.error_id,
                message = %self.message,
                "Document processing failed"
            );
        } else {
            tracing::warn!(
                reason = %self.reason,
                status = status.as_u16(),
                error_id = ?self.error_id,
                "Document processing rejected"
            );
        }

        (status, Json(self.to_payload())).into_response()
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;
