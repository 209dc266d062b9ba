//! Collector-side document scanning.
//!
//! Uploads a captured image to the document processing endpoint, retrying
//! within a small attempt budget and keeping the most confident answer.

use anyhow::Context;
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::image_optimizer::{optimize_image, ImageFile};
use crate::documents::rules::MSG_UNCLEAR;
use crate::documents::{assess_scan, ScanClarity};
use crate::domain::{DocumentType, ErrorReason, ProcessedDocumentErrorPayload, ProcessedDocumentPayload};
use crate::error::MSG_RECAPTURE;
use crate::services::telemetry::{ApiCallRecord, TelemetrySink};

/// Uploads per scan before settling for the best result.
pub const MAX_SCAN_ATTEMPTS: usize = 2;

/// A result at or above this confidence ends the retry loop.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(16);

pub const MAX_CLIENT_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
];

pub const PROCESS_ENDPOINT: &str = "/api/documents/process";

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}: {message}")]
pub struct DocumentProcessingError {
    pub reason: ErrorReason,
    pub message: String,
    pub retryable: bool,
    pub status: Option<u16>,
    pub error_id: Option<String>,
    pub confidence_score: f64,
}

impl DocumentProcessingError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            retryable: reason.is_retryable(),
            status: None,
            error_id: None,
            confidence_score: 0.0,
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout() -> Self {
        Self::new(
            ErrorReason::Timeout,
            "Document processing timed out. Please try again.",
        )
    }

    pub fn network(detail: &str) -> Self {
        debug!(detail, "Document upload failed before a response");
        Self::new(
            ErrorReason::OpenaiRequestFailed,
            "Unable to reach the document service. Please check your connection.",
        )
    }

    pub fn invalid_response() -> Self {
        Self::new(ErrorReason::InvalidOpenaiResponse, MSG_RECAPTURE)
    }
}

pub type ScanResult<T> = Result<T, DocumentProcessingError>;

/// Raw answer from the processing endpoint.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

/// Delivers one upload to the processing endpoint.
pub trait DocumentTransport: Send + Sync {
    fn upload<'a>(
        &'a self,
        document_type: DocumentType,
        file: &'a ImageFile,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}

/// Multipart upload over HTTP.
#[derive(Clone)]
pub struct HttpDocumentTransport {
    client: Client,
    url: String,
}

impl HttpDocumentTransport {
    pub fn new(base_url: &str, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let url = format!("{}{}", base_url.trim_end_matches('/'), PROCESS_ENDPOINT);
        info!(url = %url, "Document processing client initialized");
        Ok(Self { client, url })
    }

    async fn send(&self, document_type: DocumentType, file: &ImageFile) -> Result<TransportResponse, TransportError> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let form = Form::new()
            .text("documentType", document_type.as_str())
            .part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

impl DocumentTransport for HttpDocumentTransport {
    fn upload<'a>(
        &'a self,
        document_type: DocumentType,
        file: &'a ImageFile,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(self.send(document_type, file))
    }
}

/// Fallback reason when an error body carries none.
fn reason_for_status(status: u16) -> ErrorReason {
    match status {
        413 => ErrorReason::FileTooLarge,
        415 => ErrorReason::UnsupportedFileType,
        408 | 504 => ErrorReason::Timeout,
        422 => ErrorReason::InvalidOpenaiResponse,
        _ => ErrorReason::OpenaiRequestFailed,
    }
}

/// Decode an endpoint response into a payload or a typed error.
pub fn interpret_response(response: &TransportResponse) -> ScanResult<ProcessedDocumentPayload> {
    let status = response.status;

    if (200..300).contains(&status) {
        let payload = serde_json::from_slice::<ProcessedDocumentPayload>(&response.body)
            .map_err(|_| DocumentProcessingError::invalid_response().with_status(status))?;
        if payload.cropped_document_image_base64.trim().is_empty() {
            return Err(DocumentProcessingError::invalid_response().with_status(status));
        }
        return Ok(payload);
    }

    let body = serde_json::from_slice::<ProcessedDocumentErrorPayload>(&response.body).ok();
    let reason = body
        .as_ref()
        .and_then(|b| b.reason)
        .unwrap_or_else(|| reason_for_status(status));
    let message = body
        .as_ref()
        .map(|b| b.message.trim())
        .filter(|m| !m.is_empty())
        .unwrap_or(MSG_RECAPTURE)
        .to_string();

    Err(DocumentProcessingError {
        reason,
        message,
        retryable: body
            .as_ref()
            .and_then(|b| b.retryable)
            .unwrap_or_else(|| reason.is_retryable()),
        status: Some(status),
        error_id: body.as_ref().and_then(|b| b.error_id.clone()),
        confidence_score: body.map(|b| b.confidence_score).unwrap_or(0.0),
    })
}

/// Pick the result to return from a series of attempts.
///
/// The most confident success wins, earliest first on ties. With no success
/// the last error is returned.
pub fn select_best_attempt(attempts: Vec<ScanResult<ProcessedDocumentPayload>>) -> ScanResult<ProcessedDocumentPayload> {
    let mut best: Option<ProcessedDocumentPayload> = None;
    let mut last_error: Option<DocumentProcessingError> = None;

    for attempt in attempts {
        match attempt {
            Ok(payload) => {
                let better = best
                    .as_ref()
                    .map_or(true, |b| payload.confidence_score > b.confidence_score);
                if better {
                    best = Some(payload);
                }
            }
            Err(e) => last_error = Some(e),
        }
    }

    match (best, last_error) {
        (Some(payload), _) => Ok(payload),
        (None, Some(e)) => Err(e),
        (None, None) => Err(DocumentProcessingError::invalid_response()),
    }
}

/// A scan accepted by the document rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedScan {
    pub payload: ProcessedDocumentPayload,
    pub clarity: ScanClarity,
    /// Recapture hint for unclear scans.
    pub warning: Option<&'static str>,
}

pub struct DocumentProcessingClient {
    transport: Arc<dyn DocumentTransport>,
    telemetry: Arc<dyn TelemetrySink>,
    attempt_timeout: Duration,
    max_attempts: usize,
}

impl DocumentProcessingClient {
    pub fn new(transport: Arc<dyn DocumentTransport>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            transport,
            telemetry,
            attempt_timeout: ATTEMPT_TIMEOUT,
            max_attempts: MAX_SCAN_ATTEMPTS,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Reject files the endpoint would refuse, before any upload.
    fn prevalidate(file: &ImageFile) -> ScanResult<()> {
        if file.is_empty() {
            return Err(DocumentProcessingError::new(
                ErrorReason::FileRequired,
                "An image file is required.",
            ));
        }
        let mime = file.mime_type.trim().to_ascii_lowercase();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(DocumentProcessingError::new(
                ErrorReason::UnsupportedFileType,
                "Unsupported file type. Please upload a JPEG, PNG, WEBP or HEIC image.",
            ));
        }
        if file.len() > MAX_CLIENT_UPLOAD_BYTES {
            return Err(DocumentProcessingError::new(
                ErrorReason::FileTooLarge,
                format!("File too large. Maximum {}MB.", MAX_CLIENT_UPLOAD_BYTES / (1024 * 1024)),
            ));
        }
        Ok(())
    }

    fn record(&self, record: ApiCallRecord) {
        let sink = &self.telemetry;
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.record(record))).is_err() {
            warn!("Telemetry sink panicked, record dropped");
        }
    }

    async fn attempt(&self, document_type: DocumentType, file: &ImageFile, attempt: u32) -> ScanResult<ProcessedDocumentPayload> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.attempt_timeout, self.transport.upload(document_type, file)).await;

        let (status, result) = match outcome {
            Err(_) | Ok(Err(TransportError::Timeout)) => (None, Err(DocumentProcessingError::timeout())),
            Ok(Err(TransportError::Network(detail))) => (None, Err(DocumentProcessingError::network(&detail))),
            Ok(Ok(response)) => (Some(response.status), interpret_response(&response)),
        };

        self.record(ApiCallRecord {
            endpoint: PROCESS_ENDPOINT,
            duration: started.elapsed(),
            success: result.is_ok(),
            status,
            error_code: result.as_ref().err().map(|e| e.reason.as_str().to_string()),
            document_type: Some(document_type.as_str().to_string()),
            attempt,
        });
        result
    }

    /// Upload `file` and return the most confident extraction.
    #[instrument(skip(self, file), fields(document_type = %document_type))]
    pub async fn process_document_image(
        &self,
        file: ImageFile,
        document_type: DocumentType,
    ) -> ScanResult<ProcessedDocumentPayload> {
        Self::prevalidate(&file)?;
        let file = optimize_image(file).await;

        let mut attempts = Vec::with_capacity(self.max_attempts);
        for attempt in 1..=self.max_attempts {
            let result = self.attempt(document_type, &file, attempt as u32).await;
            match &result {
                Ok(payload) if payload.confidence_score >= CONFIDENCE_THRESHOLD => {
                    debug!(attempt, confidence = payload.confidence_score, "Confident scan");
                    return result;
                }
                Ok(payload) => {
                    debug!(attempt, confidence = payload.confidence_score, "Low confidence scan");
                }
                Err(e) if !e.retryable => {
                    attempts.push(result);
                    break;
                }
                Err(e) => {
                    warn!(attempt, reason = %e.reason, "Scan attempt failed");
                }
            }
            attempts.push(result);
        }

        select_best_attempt(attempts)
    }

    /// Process an image and apply the document rules to the result.
    pub async fn scan_document(&self, file: ImageFile, document_type: DocumentType) -> ScanResult<ValidatedScan> {
        let payload = self.process_document_image(file, document_type).await?;

        match assess_scan(&payload) {
            Ok(clarity) => Ok(ValidatedScan {
                warning: (clarity == ScanClarity::Unclear).then_some(MSG_UNCLEAR),
                payload,
                clarity,
            }),
            Err(rejection) => {
                info!(reason = %rejection.reason, confidence = payload.confidence_score, "Scan rejected");
                Err(DocumentProcessingError {
                    reason: rejection.reason,
                    message: rejection.message.to_string(),
                    retryable: rejection.reason.is_retryable(),
                    status: None,
                    error_id: None,
                    confidence_score: payload.confidence_score,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::image_optimizer::tests::noisy_png;
    use crate::client::image_optimizer::COMPRESSION_THRESHOLD_BYTES;
    use crate::documents::rules::MSG_EID_PREFIX;
    use crate::domain::{DocumentValidation, ExtractedDocumentData};
    use crate::services::telemetry::MemoryTelemetry;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    pub(crate) fn payload_json(document_type: DocumentType, number: &str, name: &str, confidence: f64) -> Vec<u8> {
        serde_json::to_vec(&ProcessedDocumentPayload {
            document_type,
            extracted_data: ExtractedDocumentData {
                full_name: name.into(),
                gender: "F".into(),
                document_number: number.into(),
                nationality: "ARE".into(),
            },
            validation: DocumentValidation::default(),
            cropped_document_image_base64: "aGVsbG8=".into(),
            confidence_score: confidence,
        })
        .unwrap()
    }

    pub(crate) fn ok(body: Vec<u8>) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse { status: 200, body })
    }

    /// Answers uploads from a script and records what was sent.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        answers: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        pub uploads: Mutex<Vec<ImageFile>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(answers: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }
    }

    impl DocumentTransport for ScriptedTransport {
        fn upload<'a>(
            &'a self,
            _document_type: DocumentType,
            file: &'a ImageFile,
        ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
            Box::pin(async move {
                self.uploads.lock().push(file.clone());
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                let next = self.answers.lock().pop_front();
                next.unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
            })
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> (DocumentProcessingClient, Arc<MemoryTelemetry>) {
        let telemetry = Arc::new(MemoryTelemetry::new());
        (DocumentProcessingClient::new(transport, telemetry.clone()), telemetry)
    }

    fn small_jpeg() -> ImageFile {
        ImageFile::new("eid.jpg", "image/jpeg", vec![1, 2, 3, 4])
    }

    #[tokio::test]
    async fn retries_until_confident() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(payload_json(DocumentType::EidFront, "784-1990-1234567-1", "Amina", 0.3)),
            ok(payload_json(DocumentType::EidFront, "784-1990-1234567-1", "Amina", 0.7)),
        ]));
        let (client, telemetry) = client(transport.clone());

        let payload = client
            .process_document_image(small_jpeg(), DocumentType::EidFront)
            .await
            .unwrap();
        assert_eq!(payload.confidence_score, 0.7);
        assert_eq!(transport.uploads.lock().len(), 2);

        let records = telemetry.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].attempt, 2);
        assert!(records.iter().all(|r| r.success && r.status == Some(200)));
        assert_eq!(records[0].document_type.as_deref(), Some("EID_FRONT"));
    }

    #[tokio::test]
    async fn returns_best_when_budget_runs_out() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(payload_json(DocumentType::EidBack, "", "", 0.3)),
            ok(payload_json(DocumentType::EidBack, "", "", 0.4)),
            ok(payload_json(DocumentType::EidBack, "", "", 0.9)),
        ]));
        let (client, _) = client(transport.clone());

        let payload = client
            .process_document_image(small_jpeg(), DocumentType::EidBack)
            .await
            .unwrap();
        assert_eq!(payload.confidence_score, 0.4);
        assert_eq!(transport.uploads.lock().len(), MAX_SCAN_ATTEMPTS);
    }

    #[tokio::test]
    async fn success_beats_a_later_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(payload_json(DocumentType::EidBack, "", "", 0.5)),
            Err(TransportError::Network("offline".into())),
        ]));
        let (client, telemetry) = client(transport);

        let payload = client
            .process_document_image(small_jpeg(), DocumentType::EidBack)
            .await
            .unwrap();
        assert_eq!(payload.confidence_score, 0.5);
        let records = telemetry.records();
        assert_eq!(records[1].error_code.as_deref(), Some("openai_request_failed"));
        assert_eq!(records[1].status, None);
    }

    #[tokio::test]
    async fn passport_is_compressed_and_accepted_first_time() {
        let original = noisy_png(1000, 600);
        assert!(original.len() >= COMPRESSION_THRESHOLD_BYTES);

        let transport = Arc::new(ScriptedTransport::new(vec![ok(payload_json(
            DocumentType::Passport,
            "N1234567",
            "Amina Hassan",
            0.92,
        ))]));
        let (client, _) = client(transport.clone());

        let scan = client
            .scan_document(
                ImageFile::new("passport.png", "image/png", original.clone()),
                DocumentType::Passport,
            )
            .await
            .unwrap();

        assert_eq!(scan.clarity, ScanClarity::Clear);
        assert_eq!(scan.warning, None);
        assert_eq!(scan.payload.extracted_data.document_number, "N1234567");

        let uploads = transport.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].mime_type, "image/jpeg");
        assert!(uploads[0].len() < original.len());
    }

    #[tokio::test]
    async fn eid_front_without_prefix_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(payload_json(
            DocumentType::EidFront,
            "123-4567-8901234-5",
            "Amina Hassan",
            0.95,
        ))]));
        let (client, _) = client(transport);

        let err = client
            .scan_document(small_jpeg(), DocumentType::EidFront)
            .await
            .unwrap_err();
        assert_eq!(err.reason, ErrorReason::ValidationFailed);
        assert_eq!(err.message, MSG_EID_PREFIX);
        assert!(err.retryable);
        assert_eq!(err.confidence_score, 0.95);
    }

    #[tokio::test]
    async fn low_but_acceptable_confidence_carries_warning() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(payload_json(DocumentType::EidBack, "", "", 0.4)),
            ok(payload_json(DocumentType::EidBack, "", "", 0.42)),
        ]));
        let (client, _) = client(transport);

        let scan = client.scan_document(small_jpeg(), DocumentType::EidBack).await.unwrap();
        assert_eq!(scan.clarity, ScanClarity::Unclear);
        assert_eq!(scan.warning, Some(MSG_UNCLEAR));
    }

    #[tokio::test]
    async fn missing_cropped_image_is_invalid_response() {
        let mut body: serde_json::Value =
            serde_json::from_slice(&payload_json(DocumentType::Passport, "N1234567", "Amina", 0.9)).unwrap();
        body["croppedDocumentImageBase64"] = serde_json::Value::String(String::new());
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(body.to_string().into_bytes()),
            ok(b"not json".to_vec()),
        ]));
        let (client, _) = client(transport);

        let err = client
            .process_document_image(small_jpeg(), DocumentType::Passport)
            .await
            .unwrap_err();
        assert_eq!(err.reason, ErrorReason::InvalidOpenaiResponse);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn rejected_files_never_reach_the_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (client, telemetry) = client(transport.clone());

        let gif = ImageFile::new("a.gif", "image/gif", vec![1]);
        let err = client.process_document_image(gif, DocumentType::Passport).await.unwrap_err();
        assert_eq!(err.reason, ErrorReason::UnsupportedFileType);
        assert!(!err.retryable);

        let huge = ImageFile::new("a.heic", "image/heic", vec![0; MAX_CLIENT_UPLOAD_BYTES + 1]);
        let err = client.process_document_image(huge, DocumentType::Passport).await.unwrap_err();
        assert_eq!(err.reason, ErrorReason::FileTooLarge);

        assert!(transport.uploads.lock().is_empty());
        assert!(telemetry.records().is_empty());
    }

    #[tokio::test]
    async fn non_retryable_server_error_stops_the_loop() {
        let body = serde_json::to_vec(&ProcessedDocumentErrorPayload {
            error: true,
            message: "Document processing is not configured.".into(),
            confidence_score: 0.0,
            reason: Some(ErrorReason::DocumentNotConfigured),
            retryable: Some(false),
            error_id: Some("req-1".into()),
        })
        .unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(TransportResponse { status: 500, body })]));
        let (client, _) = client(transport.clone());

        let err = client
            .process_document_image(small_jpeg(), DocumentType::Passport)
            .await
            .unwrap_err();
        assert_eq!(err.reason, ErrorReason::DocumentNotConfigured);
        assert_eq!(err.error_id.as_deref(), Some("req-1"));
        assert_eq!(err.status, Some(500));
        assert_eq!(transport.uploads.lock().len(), 1);
    }

    #[tokio::test]
    async fn slow_upload_times_out() {
        let transport = Arc::new(ScriptedTransport::slow(Duration::from_millis(300)));
        let (client, telemetry) = client(transport);
        let client = client.with_attempt_timeout(Duration::from_millis(20));

        let err = client
            .process_document_image(small_jpeg(), DocumentType::EidBack)
            .await
            .unwrap_err();
        assert_eq!(err.reason, ErrorReason::Timeout);
        assert!(err.retryable);
        assert_eq!(telemetry.records().len(), MAX_SCAN_ATTEMPTS);
    }

    #[test]
    fn error_status_without_body_maps_by_status() {
        let err = interpret_response(&TransportResponse {
            status: 413,
            body: Vec::new(),
        })
        .unwrap_err();
        assert_eq!(err.reason, ErrorReason::FileTooLarge);
        assert!(!err.retryable);
        assert_eq!(err.message, MSG_RECAPTURE);
    }

    #[test]
    fn select_best_prefers_highest_confidence() {
        let p = |c: f64| {
            serde_json::from_slice::<ProcessedDocumentPayload>(&payload_json(DocumentType::EidBack, "", "", c)).unwrap()
        };
        let best = select_best_attempt(vec![Ok(p(0.2)), Err(DocumentProcessingError::timeout()), Ok(p(0.5)), Ok(p(0.5))]);
        assert_eq!(best.unwrap().confidence_score, 0.5);

        let err = select_best_attempt(vec![
            Err(DocumentProcessingError::timeout()),
            Err(DocumentProcessingError::invalid_response()),
        ]);
        assert_eq!(err.unwrap_err().reason, ErrorReason::InvalidOpenaiResponse);
    }
}
