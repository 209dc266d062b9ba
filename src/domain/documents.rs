//! Identity document domain types.
//!
//! Wire shapes shared by the document processing endpoint and its client.
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Kind of identity document being captured.
///
/// Chosen before the upload starts and never changed afterwards; the proxy
/// always echoes the declared type back, whatever the model claims.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Passport,
    EidFront,
    EidBack,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [Self::Passport, Self::EidFront, Self::EidBack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passport => "PASSPORT",
            Self::EidFront => "EID_FRONT",
            Self::EidBack => "EID_BACK",
        }
    }

    /// Parse a wire string, ignoring surrounding whitespace. Anything else is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value.trim())
    }

    /// Human label used in prompts and user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passport => "passport photo page",
            Self::EidFront => "Emirates ID front side",
            Self::EidBack => "Emirates ID back side",
        }
    }

    /// Confidence below which an accepted scan is flagged as unclear.
    pub fn clarity_floor(&self) -> f64 {
        match self {
            Self::Passport => 0.5,
            Self::EidFront => 0.5,
            Self::EidBack => 0.45,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields read off the document by the model. Empty string when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocumentData {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub document_number: String,
    #[serde(default)]
    pub nationality: String,
}

/// Emirates ID checks. Both flags are false for non EID_FRONT documents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentValidation {
    #[serde(rename = "isValidEID", default)]
    pub is_valid_eid: bool,
    #[serde(rename = "startsWith784", default)]
    pub starts_with_784: bool,
}

/// Normalized result of a successful document extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocumentPayload {
    pub document_type: DocumentType,
    pub extracted_data: ExtractedDocumentData,
    pub validation: DocumentValidation,
    pub cropped_document_image_base64: String,
    pub confidence_score: f64,
}

/// Closed set of document processing failure reasons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidDocumentType,
    FileRequired,
    UnsupportedFileType,
    FileTooLarge,
    DocumentNotConfigured,
    OpenaiRequestFailed,
    InvalidOpenaiResponse,
    ValidationFailed,
    Timeout,
    DocumentNotClear,
}

/// What the user can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Input is wrong; retrying the same thing cannot help.
    Never,
    /// Transient upstream failure; retry the same image.
    SameImage,
    /// Business rule rejection; capture or upload a new image.
    Recapture,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDocumentType => "invalid_document_type",
            Self::FileRequired => "file_required",
            Self::UnsupportedFileType => "unsupported_file_type",
            Self::FileTooLarge => "file_too_large",
            Self::DocumentNotConfigured => "document_not_configured",
            Self::OpenaiRequestFailed => "openai_request_failed",
            Self::InvalidOpenaiResponse => "invalid_openai_response",
            Self::ValidationFailed => "validation_failed",
            Self::Timeout => "timeout",
            Self::DocumentNotClear => "document_not_clear",
        }
    }

    pub fn advice(&self) -> RetryAdvice {
        match self {
            Self::InvalidDocumentType
            | Self::FileRequired
            | Self::UnsupportedFileType
            | Self::FileTooLarge
            | Self::DocumentNotConfigured => RetryAdvice::Never,
            Self::OpenaiRequestFailed | Self::InvalidOpenaiResponse | Self::Timeout => {
                RetryAdvice::SameImage
            }
            Self::ValidationFailed | Self::DocumentNotClear => RetryAdvice::Recapture,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.advice(), RetryAdvice::Never)
    }

    /// HTTP status the proxy answers with. Upstream failures carry their own.
    pub fn default_status(&self) -> u16 {
        match self {
            Self::InvalidDocumentType | Self::FileRequired => 400,
            Self::UnsupportedFileType => 415,
            Self::FileTooLarge => 413,
            Self::DocumentNotConfigured => 500,
            Self::OpenaiRequestFailed => 502,
            Self::InvalidOpenaiResponse | Self::ValidationFailed | Self::DocumentNotClear => 422,
            Self::Timeout => 504,
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by the document processing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocumentErrorPayload {
    pub error: bool,
    pub message: String,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}
