//! Document processing endpoint.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::app::AppState;
use crate::documents::UploadedImage;
use crate::domain::DocumentType;
use crate::error::DocumentError;
use crate::middleware::RequestIdExt;

/// Fields read from the multipart form.
#[derive(Debug, Default)]
struct ProcessForm {
    document_type: Option<String>,
    file: Option<UploadedImage>,
}

fn map_multipart_error(err: MultipartError, max_upload_bytes: usize) -> DocumentError {
    debug!(error = %err.body_text(), "Failed to read multipart form");
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocumentError::file_too_large(max_upload_bytes)
    } else {
        DocumentError::file_required()
    }
}

/// Read the form. A read error is returned next to what was read before it,
/// so the document type can still be validated first.
async fn read_form(multipart: &mut Multipart, max_upload_bytes: usize) -> (ProcessForm, Option<DocumentError>) {
    let mut form = ProcessForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (form, Some(map_multipart_error(e, max_upload_bytes))),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("documentType") => match field.text().await {
                Ok(text) => form.document_type = Some(text),
                Err(e) => return (form, Some(map_multipart_error(e, max_upload_bytes))),
            },
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        form.file = Some(UploadedImage {
                            file_name,
                            content_type,
                            bytes: bytes.to_vec(),
                        })
                    }
                    Err(e) => return (form, Some(map_multipart_error(e, max_upload_bytes))),
                }
            }
            _ => {}
        }
    }

    (form, None)
}

/// Process an uploaded identity document.
///
/// Multipart fields: `documentType` (PASSPORT, EID_FRONT or EID_BACK) and
/// `file` (the image).
pub async fn process_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let error_id = headers.error_id();
    let max_upload_bytes = state.processor.max_upload_bytes();

    let (form, read_error) = match multipart {
        Ok(mut multipart) => read_form(&mut multipart, max_upload_bytes).await,
        Err(rejection) => {
            debug!(error = %rejection, "Request is not a multipart form");
            (ProcessForm::default(), Some(DocumentError::file_required()))
        }
    };

    if let Some(err) = read_error {
        let err = if form.document_type.as_deref().and_then(DocumentType::parse).is_none() {
            DocumentError::invalid_document_type()
        } else {
            err
        };
        return err.with_error_id(Some(error_id)).into_response();
    }

    match state
        .processor
        .process(form.document_type.as_deref(), form.file)
        .await
    {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => err.with_error_id(Some(error_id)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::create_app;
    use crate::config::{Environment, Settings};
    use crate::documents::processor::tests::ScriptedModel;
    use crate::documents::DocumentProcessor;
    use crate::services::vision_client::VisionModel;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    const BOUNDARY: &str = "homecollect-test-boundary";

    const ANSWER: &str = r#"{
      "documentType": "EID_FRONT",
      "extractedData": {"fullName": "Omar Saeed", "gender": "male",
                        "documentNumber": "784-1985-7654321-2", "nationality": "UAE"},
      "validation": {"isValidEID": true, "startsWith784": true},
      "croppedDocumentImageBase64": "aGVsbG8",
      "confidenceScore": "0.88"
    }"#;

    fn settings() -> Settings {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".into(),
            cors_allow_origins: vec!["http://localhost:3000".into()],
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".into(),
            openai_model: "gpt-4.1-mini".into(),
            model_timeout_seconds: 30,
            max_upload_bytes: crate::documents::MAX_UPLOAD_BYTES,
        }
    }

    fn app(model: Option<Arc<ScriptedModel>>) -> axum::Router {
        let model = model.map(|m| m as Arc<dyn VisionModel>);
        create_app(AppState::new(settings(), DocumentProcessor::new(model)))
    }

    fn multipart_request(document_type: Option<&str>, file: Option<(&str, Vec<u8>)>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(document_type) = document_type {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"documentType\"\r\n\r\n{document_type}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((mime, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"scan.jpg\"\r\nContent-Type: {mime}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/documents/process")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .header("x-request-id", "req-test-1")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn processes_an_eid_front() {
        let model = Arc::new(ScriptedModel::answering(ANSWER));
        let response = app(Some(model.clone()))
            .oneshot(multipart_request(Some("EID_FRONT"), Some(("image/jpeg", vec![0xFF; 2048]))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-test-1");
        let body = json_body(response).await;
        assert_eq!(body["documentType"], "EID_FRONT");
        assert_eq!(body["extractedData"]["documentNumber"], "784-1985-7654321-2");
        assert_eq!(body["validation"]["startsWith784"], true);
        assert_eq!(body["croppedDocumentImageBase64"], "aGVsbG8=");
        assert_eq!(body["confidenceScore"], 0.88);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_the_model() {
        let model = Arc::new(ScriptedModel::answering(ANSWER));
        let nine_mb = vec![0xFF; 9 * 1024 * 1024];
        let response = app(Some(model.clone()))
            .oneshot(multipart_request(Some("PASSPORT"), Some(("image/jpeg", nine_mb))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["reason"], "file_too_large");
        assert_eq!(body["retryable"], false);
        assert_eq!(body["errorId"], "req-test-1");
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_model_key_is_a_server_error() {
        let response = app(None)
            .oneshot(multipart_request(Some("PASSPORT"), Some(("image/png", vec![1; 64]))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["reason"], "document_not_configured");
        assert_eq!(body["confidenceScore"], 0.0);
    }

    #[tokio::test]
    async fn unknown_document_type_is_rejected() {
        let model = Arc::new(ScriptedModel::answering(ANSWER));
        let response = app(Some(model.clone()))
            .oneshot(multipart_request(Some("DRIVING_LICENSE"), Some(("image/png", vec![1; 64]))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["reason"], "invalid_document_type");
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_image_and_missing_file_are_rejected() {
        let response = app(None)
            .oneshot(multipart_request(Some("PASSPORT"), Some(("application/pdf", vec![1; 64]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(response).await["reason"], "unsupported_file_type");

        let response = app(None)
            .oneshot(multipart_request(Some("PASSPORT"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["reason"], "file_required");
    }

    #[tokio::test]
    async fn cors_preflight_is_answered_by_the_middleware_stack() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/documents/process")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app(None).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let response = app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["documentProcessing"], "not_configured");
    }
}
