//! Booking workflow for a collector: list bookings, capture identity
//! documents per patient and submit the collected sample.
//!
//! Submission first patches patient records, then marks the sample
//! collected. A network failure at either step moves the work to the offline
//! queue; a rejection by the booking API is returned to the caller as-is.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::document_client::{DocumentProcessingClient, DocumentProcessingError, ValidatedScan};
use super::image_optimizer::ImageFile;
use super::queue::{NewSubmission, SampleSubmissionQueue};
use super::reconciler::{build_patient_updates, merge_extracted_identity, PatientForm};
use crate::domain::{
    Booking, BookingBucket, BookingListQuery, BookingPage, BookingPatientUpdate, DocumentType,
    MarkCollectedRequest,
};
use crate::services::booking_api::{BookingApi, BookingApiError, BookingApiResult};

/// State of one document capture.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSlot {
    Empty,
    Processing,
    Ready(ValidatedScan),
    Failed(DocumentProcessingError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCapture {
    pub patient_id: String,
    pub document_type: DocumentType,
    pub slot: DocumentSlot,
}

/// Why a draft cannot be submitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    Processing,
    Failed,
    NoDocument,
}

impl NotReady {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Processing => "Please wait for document processing to finish.",
            Self::Failed => "A document could not be processed. Please recapture or remove it.",
            Self::NoDocument => "Please capture at least one identity document.",
        }
    }
}

/// Edits and captures for one booking, held until submission.
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub booking_id: String,
    pub forms: Vec<PatientForm>,
    pub captures: Vec<DocumentCapture>,
}

impl SubmissionDraft {
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id.clone(),
            forms: booking.patients.iter().map(PatientForm::from_patient).collect(),
            captures: Vec::new(),
        }
    }

    pub fn slot(&self, patient_id: &str, document_type: DocumentType) -> &DocumentSlot {
        self.captures
            .iter()
            .find(|c| c.patient_id == patient_id && c.document_type == document_type)
            .map(|c| &c.slot)
            .unwrap_or(&DocumentSlot::Empty)
    }

    pub fn set_slot(&mut self, patient_id: &str, document_type: DocumentType, slot: DocumentSlot) {
        match self
            .captures
            .iter_mut()
            .find(|c| c.patient_id == patient_id && c.document_type == document_type)
        {
            Some(capture) => capture.slot = slot,
            None => self.captures.push(DocumentCapture {
                patient_id: patient_id.to_string(),
                document_type,
                slot,
            }),
        }
    }

    /// Drop a capture so its slot reads as empty again.
    pub fn clear_slot(&mut self, patient_id: &str, document_type: DocumentType) {
        self.captures
            .retain(|c| !(c.patient_id == patient_id && c.document_type == document_type));
    }

    /// Ready means nothing in flight, nothing failed and at least one
    /// accepted document.
    pub fn readiness(&self) -> Result<(), NotReady> {
        let slots = || self.captures.iter().map(|c| &c.slot);
        if slots().any(|s| matches!(s, DocumentSlot::Processing)) {
            return Err(NotReady::Processing);
        }
        if slots().any(|s| matches!(s, DocumentSlot::Failed(_))) {
            return Err(NotReady::Failed);
        }
        if !slots().any(|s| matches!(s, DocumentSlot::Ready(_))) {
            return Err(NotReady::NoDocument);
        }
        Ok(())
    }

    /// Cropped images of accepted documents, in capture order.
    pub fn cropped_images(&self) -> Vec<String> {
        self.captures
            .iter()
            .filter_map(|c| match &c.slot {
                DocumentSlot::Ready(scan) => Some(scan.payload.cropped_document_image_base64.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Submitted { event_id: String },
    /// Saved for background sync after a network failure.
    Queued { queue_id: String, event_id: String },
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{}", .0.message())]
    DocumentsNotReady(NotReady),

    /// The booking API refused the submission. Never queued.
    #[error("{message}")]
    Rejected {
        code: Option<String>,
        message: String,
        patient_ids: Vec<String>,
    },

    #[error("Failed to save the submission for later sync: {0}")]
    Queue(#[from] anyhow::Error),
}

pub struct BookingsOrchestrator {
    collector_id: String,
    api: Arc<dyn BookingApi>,
    documents: Arc<DocumentProcessingClient>,
    queue: Arc<SampleSubmissionQueue>,
}

impl BookingsOrchestrator {
    pub fn new(
        collector_id: impl Into<String>,
        api: Arc<dyn BookingApi>,
        documents: Arc<DocumentProcessingClient>,
        queue: Arc<SampleSubmissionQueue>,
    ) -> Self {
        Self {
            collector_id: collector_id.into(),
            api,
            documents,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<SampleSubmissionQueue> {
        &self.queue
    }

    /// One page of the collector's bookings. Pass the previous page's
    /// `next_before_start_at` to continue.
    pub async fn load_bookings(
        &self,
        bucket: BookingBucket,
        before_start_at: Option<DateTime<Utc>>,
        status: Option<String>,
        limit: Option<u32>,
    ) -> BookingApiResult<BookingPage> {
        let query = BookingListQuery {
            collector_id: self.collector_id.clone(),
            bucket,
            before_start_at,
            status,
            limit,
        };
        self.api.list_bookings(&query).await
    }

    /// Scan a document into its slot. On success, extracted identity fills
    /// the patient's empty form fields.
    #[instrument(skip(self, draft, file), fields(booking_id = %draft.booking_id))]
    pub async fn capture_document(
        &self,
        draft: &mut SubmissionDraft,
        patient_id: &str,
        document_type: DocumentType,
        file: ImageFile,
    ) -> Result<(), DocumentProcessingError> {
        draft.set_slot(patient_id, document_type, DocumentSlot::Processing);

        match self.documents.scan_document(file, document_type).await {
            Ok(scan) => {
                if let Some(form) = draft.forms.iter_mut().find(|f| f.current_patient_id == patient_id) {
                    merge_extracted_identity(form, &scan.payload);
                }
                draft.set_slot(patient_id, document_type, DocumentSlot::Ready(scan));
                Ok(())
            }
            Err(e) => {
                draft.set_slot(patient_id, document_type, DocumentSlot::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Patch patients, then mark the sample collected.
    #[instrument(skip(self, booking, draft), fields(booking_id = %booking.id))]
    pub async fn submit(&self, booking: &Booking, draft: &SubmissionDraft) -> Result<SubmissionOutcome, SubmissionError> {
        draft.readiness().map_err(SubmissionError::DocumentsNotReady)?;

        let updates = build_patient_updates(&draft.forms, &booking.patients);
        let cropped_images = draft.cropped_images();
        // A retry of a queued submission must reuse its idempotency key.
        let queued_event_id = self.queue.pending_event_id(&booking.id).await?;
        let event_id = queued_event_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let collected_at = Utc::now();

        if !updates.is_empty() {
            if let Err(e) = self.api.update_patients(&booking.api_booking_id, &updates).await {
                return self
                    .handle_failure(e, booking, updates, cropped_images, event_id, collected_at)
                    .await;
            }
        }

        let request = MarkCollectedRequest {
            event_id: event_id.clone(),
            collected_at,
            document_images: cropped_images.clone(),
        };
        if let Err(e) = self
            .api
            .mark_sample_collected(&booking.api_booking_id, &request)
            .await
        {
            // Patients are already patched; replaying the patch could fail
            // once a patient id was renamed.
            return self
                .handle_failure(e, booking, Vec::new(), cropped_images, event_id, collected_at)
                .await;
        }

        info!(event_id = %event_id, patients_updated = updates.len(), "Sample marked collected");

        // The queued attempt went through here; replaying its patch would
        // touch the patients twice.
        if queued_event_id.is_some() {
            if let Err(e) = self.queue.mark_synced(&booking.id).await {
                warn!(error = %e, "Failed to settle the queued submission");
            }
        }
        Ok(SubmissionOutcome::Submitted { event_id })
    }

    async fn handle_failure(
        &self,
        error: BookingApiError,
        booking: &Booking,
        updates: Vec<BookingPatientUpdate>,
        cropped_images: Vec<String>,
        event_id: String,
        collected_at: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        match error {
            BookingApiError::Network(detail) => {
                warn!(detail = %detail, "Booking API unreachable, queueing submission");
                let queued = self
                    .queue
                    .enqueue(NewSubmission {
                        booking_id: booking.id.clone(),
                        api_booking_id: booking.api_booking_id.clone(),
                        updates,
                        cropped_images,
                        event_id,
                        collected_at,
                    })
                    .await?;
                Ok(SubmissionOutcome::Queued {
                    queue_id: queued.id,
                    event_id: queued.event_id,
                })
            }
            BookingApiError::Rejected {
                code,
                message,
                patient_ids,
                ..
            } => Err(SubmissionError::Rejected {
                code,
                message,
                patient_ids,
            }),
            BookingApiError::Decode(detail) => Err(SubmissionError::Rejected {
                code: None,
                message: format!("Unexpected response from the booking service: {}", detail),
                patient_ids: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::document_client::tests::{ok, payload_json, ScriptedTransport};
    use crate::client::fakes::{ApiCall, FakeBookingApi};
    use crate::client::queue::{MemoryQueueStore, ReconcileOutcome};
    use crate::domain::{BookingPatient, SubmissionState};
    use crate::services::telemetry::MemoryTelemetry;
    use chrono::TimeZone;

    struct Harness {
        api: Arc<FakeBookingApi>,
        store: Arc<MemoryQueueStore>,
        orchestrator: BookingsOrchestrator,
    }

    fn harness(scans: Vec<Vec<u8>>) -> Harness {
        let api = Arc::new(FakeBookingApi::new());
        let store = Arc::new(MemoryQueueStore::new());
        let transport = Arc::new(ScriptedTransport::new(scans.into_iter().map(ok).collect()));
        let documents = Arc::new(DocumentProcessingClient::new(transport, Arc::new(MemoryTelemetry::new())));
        let queue = Arc::new(SampleSubmissionQueue::new(store.clone(), api.clone()));
        Harness {
            orchestrator: BookingsOrchestrator::new("col-1", api.clone(), documents, queue),
            api,
            store,
        }
    }

    fn booking() -> Booking {
        Booking {
            id: "BK-1".into(),
            api_booking_id: "api-BK-1".into(),
            status: "assigned".into(),
            start_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
            address: Some("Villa 12, Al Barsha".into()),
            sample_collected_at: None,
            patients: vec![BookingPatient {
                patient_id: "P1".into(),
                name: "Amina Hassan".into(),
                age: Some(34),
                gender: None,
                national_id: None,
                tests_count: Some(1),
            }],
        }
    }

    fn eid_scan() -> Vec<u8> {
        payload_json(DocumentType::EidFront, "784-1990-1234567-1", "Amina Hassan", 0.9)
    }

    fn photo() -> ImageFile {
        ImageFile::new("eid.jpg", "image/jpeg", vec![1, 2, 3])
    }

    async fn captured_draft(h: &Harness, booking: &Booking) -> SubmissionDraft {
        let mut draft = SubmissionDraft::for_booking(booking);
        h.orchestrator
            .capture_document(&mut draft, "P1", DocumentType::EidFront, photo())
            .await
            .unwrap();
        draft
    }

    #[tokio::test]
    async fn capture_merges_identity_into_form() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;

        assert!(matches!(draft.slot("P1", DocumentType::EidFront), DocumentSlot::Ready(_)));
        assert_eq!(draft.slot("P1", DocumentType::Passport), &DocumentSlot::Empty);
        assert_eq!(draft.forms[0].national_id, "784199012345671");
        assert_eq!(draft.forms[0].gender, "F");
        assert_eq!(draft.readiness(), Ok(()));
    }

    #[tokio::test]
    async fn failed_capture_blocks_submission() {
        let rejected = payload_json(DocumentType::EidFront, "12345", "Amina Hassan", 0.9);
        let h = harness(vec![rejected]);
        let booking = booking();
        let mut draft = SubmissionDraft::for_booking(&booking);

        let err = h
            .orchestrator
            .capture_document(&mut draft, "P1", DocumentType::EidFront, photo())
            .await
            .unwrap_err();
        assert_eq!(err.reason, crate::domain::ErrorReason::ValidationFailed);
        assert_eq!(draft.readiness(), Err(NotReady::Failed));

        let result = h.orchestrator.submit(&booking, &draft).await;
        assert!(matches!(result, Err(SubmissionError::DocumentsNotReady(NotReady::Failed))));
        assert!(h.api.calls().is_empty());

        draft.clear_slot("P1", DocumentType::EidFront);
        assert_eq!(draft.readiness(), Err(NotReady::NoDocument));
        draft.set_slot("P1", DocumentType::Passport, DocumentSlot::Processing);
        assert_eq!(draft.readiness(), Err(NotReady::Processing));
    }

    #[tokio::test]
    async fn online_submission_patches_then_marks_collected() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;

        let outcome = h.orchestrator.submit(&booking, &draft).await.unwrap();
        let SubmissionOutcome::Submitted { event_id } = outcome else {
            panic!("expected a direct submission");
        };

        let calls = h.api.calls();
        assert_eq!(calls.len(), 2);
        let ApiCall::UpdatePatients { updates, .. } = &calls[0] else {
            panic!("patients must be patched first");
        };
        assert_eq!(updates[0].national_id.as_deref(), Some("784199012345671"));
        assert!(matches!(
            &calls[1],
            ApiCall::MarkCollected { event_id: sent, document_images, .. }
                if *sent == event_id && document_images == &vec!["aGVsbG8=".to_string()]
        ));
        assert!(h.orchestrator.queue().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_submission_is_queued_then_synced() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;

        h.api.set_offline(true);
        let outcome = h.orchestrator.submit(&booking, &draft).await.unwrap();
        let SubmissionOutcome::Queued { event_id, .. } = outcome else {
            panic!("expected the submission to be queued");
        };

        let queued = h.orchestrator.queue().list().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].state, SubmissionState::Pending);
        assert_eq!(queued[0].updates.len(), 1);

        h.api.set_offline(false);
        h.api.observe(h.store.clone());
        let pass = h.orchestrator.queue().reconcile().await.unwrap();
        assert!(matches!(pass, ReconcileOutcome::Completed(r) if r.synced == 1));

        assert_eq!(*h.api.observed_states.lock(), vec![SubmissionState::Syncing]);
        let item = h.orchestrator.queue().list().await.unwrap().remove(0);
        assert_eq!(item.state, SubmissionState::Synced);
        assert!(h
            .api
            .calls()
            .iter()
            .any(|c| matches!(c, ApiCall::MarkCollected { event_id: sent, .. } if *sent == event_id)));
    }

    #[tokio::test]
    async fn resubmitting_while_queued_keeps_event_id() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;
        h.api.set_offline(true);

        let first = h.orchestrator.submit(&booking, &draft).await.unwrap();
        let second = h.orchestrator.submit(&booking, &draft).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.orchestrator.queue().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_resubmission_settles_the_queued_record() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;

        h.api.set_offline(true);
        let queued = h.orchestrator.submit(&booking, &draft).await.unwrap();
        let SubmissionOutcome::Queued { event_id: queued_event, .. } = queued else {
            panic!("expected the submission to be queued");
        };

        h.api.set_offline(false);
        let live = h.orchestrator.submit(&booking, &draft).await.unwrap();
        assert_eq!(live, SubmissionOutcome::Submitted { event_id: queued_event });
        assert_eq!(h.orchestrator.queue().pending_count().await.unwrap(), 0);

        h.orchestrator.queue().reconcile().await.unwrap();
        let patches = h
            .api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::UpdatePatients { .. }))
            .count();
        assert_eq!(patches, 1);
        let item = h.orchestrator.queue().list().await.unwrap().remove(0);
        assert_eq!(item.state, SubmissionState::Synced);
        assert!(item.updates.is_empty());
    }

    #[tokio::test]
    async fn rejection_is_surfaced_and_not_queued() {
        let h = harness(vec![eid_scan()]);
        let booking = booking();
        let draft = captured_draft(&h, &booking).await;
        h.api.reject_with(BookingApiError::Rejected {
            status: 422,
            code: Some("duplicate_national_id".into()),
            message: "National ID already belongs to another patient".into(),
            patient_ids: vec!["P1".into()],
        });

        let err = h.orchestrator.submit(&booking, &draft).await.unwrap_err();
        match err {
            SubmissionError::Rejected { code, message, patient_ids } => {
                assert_eq!(code.as_deref(), Some("duplicate_national_id"));
                assert_eq!(message, "National ID already belongs to another patient");
                assert_eq!(patient_ids, vec!["P1".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.orchestrator.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_bookings_passes_page_through() {
        let h = harness(vec![]);
        *h.api.page.lock() = Some(BookingPage {
            bookings: vec![booking()],
            next_before_start_at: None,
        });

        let page = h
            .orchestrator
            .load_bookings(BookingBucket::Current, None, None, Some(20))
            .await
            .unwrap();
        assert_eq!(page.bookings.len(), 1);
        assert_eq!(page.bookings[0].api_booking_id, "api-BK-1");
    }
}
