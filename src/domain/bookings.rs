//! Booking and patient types exchanged with the booking API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which booking list a collector is looking at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingBucket {
    #[default]
    Current,
    Past,
}

impl BookingBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Past => "past",
        }
    }
}

/// Patient snapshot attached to a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingPatient {
    pub patient_id: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub tests_count: Option<u32>,
}

/// A scheduled home visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    /// Identifier the booking API expects in its paths.
    pub api_booking_id: String,
    pub status: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub sample_collected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub patients: Vec<BookingPatient>,
}

/// List query for a collector's bookings.
#[derive(Debug, Clone, Default)]
pub struct BookingListQuery {
    pub collector_id: String,
    pub bucket: BookingBucket,
    /// Cursor: only bookings starting strictly before this instant.
    pub before_start_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// One page of bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    /// Cursor for the next page, absent on the last page.
    #[serde(default)]
    pub next_before_start_at: Option<DateTime<Utc>>,
}

/// Sparse patient diff. Only changed fields are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BookingPatientUpdate {
    pub current_patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// `Some("")` clears the stored id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
}

impl BookingPatientUpdate {
    pub fn new(current_patient_id: impl Into<String>) -> Self {
        Self {
            current_patient_id: current_patient_id.into(),
            ..Default::default()
        }
    }

    /// True when nothing besides the key is set.
    pub fn is_empty(&self) -> bool {
        self.new_patient_id.is_none()
            && self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.national_id.is_none()
    }
}

/// Request body for the patient patch endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PatientUpdatesRequest<'a> {
    pub updates: &'a [BookingPatientUpdate],
}

/// Request body for the mark-sample-collected endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkCollectedRequest {
    /// Idempotency key; identical for every retry of one submission.
    pub event_id: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_images: Vec<String>,
}

/// Error body returned by the booking API.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BookingApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub patient_ids: Vec<String>,
}
