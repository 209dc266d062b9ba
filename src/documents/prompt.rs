//! Extraction instructions and the strict output schema sent to the model.

use serde_json::{json, Value};

use crate::domain::DocumentType;

/// Schema name registered with the structured output request.
pub const SCHEMA_NAME: &str = "identity_document_extraction";

/// JSON Schema the model's answer must satisfy.
///
/// Strict mode requires every property to be listed in `required` and
/// `additionalProperties: false` on every object.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "documentType",
            "extractedData",
            "validation",
            "croppedDocumentImageBase64",
            "confidenceScore"
        ],
        "properties": {
            "documentType": {
                "type": "string",
                "enum": DocumentType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>()
            },
            "extractedData": {
                "type": "object",
                "additionalProperties": false,
                "required": ["fullName", "gender", "documentNumber", "nationality"],
                "properties": {
                    "fullName": { "type": "string" },
                    "gender": { "type": "string" },
                    "documentNumber": { "type": "string" },
                    "nationality": { "type": "string" }
                }
            },
            "validation": {
                "type": "object",
                "additionalProperties": false,
                "required": ["isValidEID", "startsWith784"],
                "properties": {
                    "isValidEID": { "type": "boolean" },
                    "startsWith784": { "type": "boolean" }
                }
            },
            "croppedDocumentImageBase64": { "type": "string" },
            "confidenceScore": { "type": "number" }
        }
    })
}

fn type_instructions(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Passport => {
            "Read the passport photo page. documentNumber is the passport number. \
             Prefer the machine readable zone when the printed fields are unclear."
        }
        DocumentType::EidFront => {
            "Read the front side of a UAE Emirates ID card. documentNumber is the ID \
             number exactly as printed (it normally starts with 784). Set \
             validation.isValidEID to true only if the card looks like a genuine \
             Emirates ID front side."
        }
        DocumentType::EidBack => {
            "This is the back side of a UAE Emirates ID card. Fields may be left empty \
             if they are not printed on this side."
        }
    }
}

/// Deterministic instruction prompt for one document type.
pub fn build_prompt(document_type: DocumentType) -> String {
    let schema = serde_json::to_string_pretty(&extraction_schema()).unwrap_or_default();

    format!(
        "You extract identity data from a photo of a {label}.\n\
         Expected documentType: {code}.\n\
         {specific}\n\
         Rules:\n\
         - Copy text exactly as printed. Never guess or infer missing values; use an empty string.\n\
         - gender is \"male\", \"female\" or empty.\n\
         - croppedDocumentImageBase64 is the document region cropped from the photo, base64 encoded JPEG.\n\
         - confidenceScore is a number between 0 and 1 describing how legible the document is.\n\
         - If the photo does not show a {label}, return a confidenceScore below 0.35.\n\
         Answer with JSON only, matching this schema:\n{schema}",
        label = document_type.label(),
        code = document_type.as_str(),
        specific = type_instructions(document_type),
    )
}
