//! Test doubles for the collector-side services.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::client::queue::store::{decode_records, MemoryQueueStore};
use crate::domain::{
    BookingListQuery, BookingPage, BookingPatientUpdate, MarkCollectedRequest, SubmissionState,
};
use crate::services::booking_api::{BookingApi, BookingApiError, BookingApiResult};

/// A call received by [`FakeBookingApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    UpdatePatients {
        api_booking_id: String,
        updates: Vec<BookingPatientUpdate>,
    },
    MarkCollected {
        api_booking_id: String,
        event_id: String,
        document_images: Vec<String>,
    },
}

/// Booking API double. Switch it offline to make every call a network error.
#[derive(Default)]
pub struct FakeBookingApi {
    offline: AtomicBool,
    rejection: Mutex<Option<BookingApiError>>,
    pub calls: Mutex<Vec<ApiCall>>,
    /// When set, queue states are captured during each mark-collected call.
    observed_store: Mutex<Option<Arc<MemoryQueueStore>>>,
    pub observed_states: Mutex<Vec<SubmissionState>>,
    pub page: Mutex<Option<BookingPage>>,
    /// When set, patches must name a known patient and renames are applied.
    patients: Mutex<Option<Vec<String>>>,
    failing_marks: AtomicUsize,
    mark_gate: Mutex<Option<MarkGate>>,
}

/// Holds a mark-collected call open until the test releases it.
#[derive(Clone, Default)]
pub struct MarkGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeBookingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn reject_with(&self, error: BookingApiError) {
        *self.rejection.lock() = Some(error);
    }

    pub fn observe(&self, store: Arc<MemoryQueueStore>) {
        *self.observed_store.lock() = Some(store);
    }

    pub fn track_patients(&self, ids: &[&str]) {
        *self.patients.lock() = Some(ids.iter().map(|id| id.to_string()).collect());
    }

    pub fn patient_ids(&self) -> Vec<String> {
        self.patients.lock().clone().unwrap_or_default()
    }

    /// Fail the next `count` mark-collected calls with a network error.
    pub fn fail_next_marks(&self, count: usize) {
        self.failing_marks.store(count, Ordering::SeqCst);
    }

    pub fn gate_marks(&self) -> MarkGate {
        let gate = MarkGate::default();
        *self.mark_gate.lock() = Some(gate.clone());
        gate
    }

    fn apply_updates(&self, updates: &[BookingPatientUpdate]) -> BookingApiResult<()> {
        let mut patients = self.patients.lock();
        let Some(ids) = patients.as_mut() else {
            return Ok(());
        };
        for update in updates {
            let Some(id) = ids.iter_mut().find(|id| **id == update.current_patient_id) else {
                return Err(BookingApiError::Rejected {
                    status: 404,
                    code: Some("patient_not_found".into()),
                    message: format!("unknown patient {}", update.current_patient_id),
                    patient_ids: vec![update.current_patient_id.clone()],
                });
            };
            if let Some(new_id) = &update.new_patient_id {
                *id = new_id.clone();
            }
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    fn check(&self) -> BookingApiResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BookingApiError::Network("connection refused".into()));
        }
        match self.rejection.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl BookingApi for FakeBookingApi {
    fn list_bookings<'a>(&'a self, _query: &'a BookingListQuery) -> BoxFuture<'a, BookingApiResult<BookingPage>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.page.lock().clone().unwrap_or(BookingPage {
                bookings: Vec::new(),
                next_before_start_at: None,
            }))
        })
    }

    fn update_patients<'a>(
        &'a self,
        api_booking_id: &'a str,
        updates: &'a [BookingPatientUpdate],
    ) -> BoxFuture<'a, BookingApiResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.apply_updates(updates)?;
            self.calls.lock().push(ApiCall::UpdatePatients {
                api_booking_id: api_booking_id.to_string(),
                updates: updates.to_vec(),
            });
            Ok(())
        })
    }

    fn mark_sample_collected<'a>(
        &'a self,
        api_booking_id: &'a str,
        request: &'a MarkCollectedRequest,
    ) -> BoxFuture<'a, BookingApiResult<()>> {
        Box::pin(async move {
            if let Some(store) = self.observed_store.lock().clone() {
                let states = store
                    .raw()
                    .map(|raw| decode_records(&raw))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| r.state);
                self.observed_states.lock().extend(states);
            }
            let gate = self.mark_gate.lock().take();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            self.check()?;
            let failing = self.failing_marks.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_marks.store(failing - 1, Ordering::SeqCst);
                return Err(BookingApiError::Network("connection reset".into()));
            }
            self.calls.lock().push(ApiCall::MarkCollected {
                api_booking_id: api_booking_id.to_string(),
                event_id: request.event_id.clone(),
                document_images: request.document_images.clone(),
            });
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { !self.offline.load(Ordering::SeqCst) })
    }
}
