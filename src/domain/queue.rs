//! Offline sample submission records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bookings::BookingPatientUpdate;

/// Sync state of a queued submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SubmissionState {
    /// States picked up by a reconciliation pass.
    ///
    /// `Syncing` is included because no pass is in flight when a new one
    /// starts, so a `Syncing` record was left behind by an interrupted pass.
    pub fn needs_sync(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed | Self::Syncing)
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionState::Pending => write!(f, "PENDING"),
            SubmissionState::Syncing => write!(f, "SYNCING"),
            SubmissionState::Synced => write!(f, "SYNCED"),
            SubmissionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A "mark sample collected" attempt waiting for connectivity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSampleSubmission {
    pub id: String,
    pub booking_id: String,
    pub api_booking_id: String,
    #[serde(default)]
    pub updates: Vec<BookingPatientUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cropped_document_image_base64_list: Option<Vec<String>>,
    pub event_id: String,
    pub collected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    pub state: SubmissionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl QueuedSampleSubmission {
    /// Structural checks beyond what serde enforces.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
            && !self.booking_id.trim().is_empty()
            && !self.api_booking_id.trim().is_empty()
            && !self.event_id.trim().is_empty()
            && self
                .updates
                .iter()
                .all(|u| !u.current_patient_id.trim().is_empty())
    }
}
