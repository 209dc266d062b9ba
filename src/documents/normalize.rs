//! Untrusted model output decoding.
//!
//! Everything the vision model returns passes through this module. Nothing
//! here panics or returns an error type: malformed input becomes `None` or a
//! default value, and callers decide how to report it.

use serde_json::Value;

use crate::domain::ExtractedDocumentData;

/// Fields decoded from the model's JSON answer, before business rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelExtraction {
    pub extracted_data: ExtractedDocumentData,
    /// The model's own opinion on whether the EID is genuine.
    pub model_says_valid_eid: bool,
    /// Normalized base64 body, empty when the model sent nothing usable.
    pub cropped_image_base64: String,
    pub confidence_score: f64,
}

/// Normalize a base64 payload to the standard padded alphabet.
///
/// Strips a `data:` URI prefix, whitespace, maps the URL-safe alphabet to the
/// standard one and re-pads to a multiple of four. Idempotent.
pub fn normalize_base64(input: &str) -> String {
    let trimmed = input.trim();
    let body = if trimmed.starts_with("data:") {
        match trimmed.find(',') {
            Some(idx) => &trimmed[idx + 1..],
            None => "",
        }
    } else {
        trimmed
    };

    let mut out: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    while out.ends_with('=') {
        out.pop();
    }
    if out.is_empty() {
        return out;
    }
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// Parse a confidence value (number or numeric string) into [0, 1].
pub fn normalize_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Remove whitespace and hyphens from a document number.
pub fn clean_document_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Trimmed string at `key`, or `""` when missing or not a string.
fn string_field(object: &Value, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };

    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Pull the textual answer out of a Responses API body.
///
/// Prefers the consolidated `output_text` field; otherwise concatenates every
/// `output_text`/`text` chunk found in the `output` array.
pub fn extract_output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }

    let mut combined = String::new();
    for item in response.get("output").and_then(Value::as_array)? {
        let chunks = match item.get("content") {
            Some(Value::Array(content)) => content.iter().collect::<Vec<_>>(),
            _ => vec![item],
        };
        for chunk in chunks {
            let kind = chunk.get("type").and_then(Value::as_str).unwrap_or("");
            if kind != "output_text" && kind != "text" {
                continue;
            }
            if let Some(text) = chunk.get("text").and_then(Value::as_str) {
                combined.push_str(text);
            }
        }
    }

    if combined.trim().is_empty() {
        None
    } else {
        Some(combined)
    }
}

/// Decode the model's JSON answer. `None` when it is not the expected shape.
pub fn decode_model_output(text: &str) -> Option<ModelExtraction> {
    let value: Value = serde_json::from_str(strip_code_fences(text)).ok()?;
    let root = value.as_object()?;
    let data = root.get("extractedData")?;
    if !data.is_object() {
        return None;
    }

    let model_says_valid_eid = root
        .get("validation")
        .and_then(|v| v.get("isValidEID"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let cropped_image_base64 = root
        .get("croppedDocumentImageBase64")
        .and_then(Value::as_str)
        .map(normalize_base64)
        .unwrap_or_default();

    Some(ModelExtraction {
        extracted_data: ExtractedDocumentData {
            full_name: string_field(data, "fullName"),
            gender: string_field(data, "gender"),
            document_number: string_field(data, "documentNumber"),
            nationality: string_field(data, "nationality"),
        },
        model_says_valid_eid,
        cropped_image_base64,
        confidence_score: normalize_confidence(root.get("confidenceScore")),
    })
}
