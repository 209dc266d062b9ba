//! Document-type business rules.
//!
//! `eid_validation` runs on the proxy when the payload is built.
//! `assess_scan` runs on the collector side before a scan is accepted.

use crate::domain::{DocumentType, DocumentValidation, ErrorReason, ProcessedDocumentPayload};

use super::normalize::clean_document_number;

/// Scans below this confidence are rejected for every document type.
pub const GLOBAL_CONFIDENCE_FLOOR: f64 = 0.35;

/// Emirates ID numbers always begin with this prefix.
pub const EID_PREFIX: &str = "784";

pub const PASSPORT_MIN_NUMBER_LEN: usize = 5;
pub const PASSPORT_MIN_NAME_LEN: usize = 3;

pub const MSG_UNSUPPORTED_DOCUMENT: &str =
    "Unsupported document. Please capture a clear photo of a passport or Emirates ID.";
pub const MSG_EID_PREFIX: &str =
    "Emirates ID must start with 784. Please recapture or upload a valid EID front.";
pub const MSG_INVALID_PASSPORT: &str =
    "This is not a valid passport front page. Please recapture the photo page.";
pub const MSG_UNCLEAR: &str = "The document image is not clear. Please recapture for best results.";

/// Compute the EID flags for a payload.
///
/// `is_valid_eid` can only be true when the cleaned number carries the 784
/// prefix. Other document types get both flags reset.
pub fn eid_validation(
    document_type: DocumentType,
    document_number: &str,
    model_says_valid: bool,
) -> DocumentValidation {
    match document_type {
        DocumentType::EidFront => {
            let starts_with_784 = clean_document_number(document_number).starts_with(EID_PREFIX);
            DocumentValidation {
                is_valid_eid: starts_with_784 && model_says_valid,
                starts_with_784,
            }
        }
        DocumentType::Passport | DocumentType::EidBack => DocumentValidation::default(),
    }
}

/// How readable an accepted scan is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanClarity {
    Clear,
    /// Kept as present, but the collector is asked to recapture.
    Unclear,
}

/// Rejected scan with the reason and user message to show.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRejection {
    pub reason: ErrorReason,
    pub message: &'static str,
}

/// Apply the confidence floors and document-type rules to a payload.
pub fn assess_scan(payload: &ProcessedDocumentPayload) -> Result<ScanClarity, ScanRejection> {
    if payload.confidence_score < GLOBAL_CONFIDENCE_FLOOR {
        return Err(ScanRejection {
            reason: ErrorReason::DocumentNotClear,
            message: MSG_UNSUPPORTED_DOCUMENT,
        });
    }

    let data = &payload.extracted_data;
    match payload.document_type {
        DocumentType::EidFront => {
            if !clean_document_number(&data.document_number).starts_with(EID_PREFIX) {
                return Err(ScanRejection {
                    reason: ErrorReason::ValidationFailed,
                    message: MSG_EID_PREFIX,
                });
            }
        }
        DocumentType::Passport => {
            let number_ok =
                clean_document_number(&data.document_number).chars().count() >= PASSPORT_MIN_NUMBER_LEN;
            let name_ok = data.full_name.trim().chars().count() >= PASSPORT_MIN_NAME_LEN;
            if !number_ok || !name_ok {
                return Err(ScanRejection {
                    reason: ErrorReason::ValidationFailed,
                    message: MSG_INVALID_PASSPORT,
                });
            }
        }
        DocumentType::EidBack => {}
    }

    if payload.confidence_score < payload.document_type.clarity_floor() {
        Ok(ScanClarity::Unclear)
    } else {
        Ok(ScanClarity::Clear)
    }
}
