//! Booking API client.
//!
//! Lists a collector's bookings, patches patient snapshots and marks samples
//! collected. Failures are split into network problems, which the offline
//! queue recovers from, and rejections that must be shown to the user.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::domain::{
    BookingApiErrorBody, BookingListQuery, BookingPage, BookingPatientUpdate, MarkCollectedRequest,
    PatientUpdatesRequest,
};

#[derive(Debug, Clone, Error)]
pub enum BookingApiError {
    /// The request never got a usable answer (offline, DNS, timeout, gateway).
    #[error("network error: {0}")]
    Network(String),

    /// The API answered and refused the request.
    #[error("{message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
        patient_ids: Vec<String>,
    },

    #[error("unexpected booking API response: {0}")]
    Decode(String),
}

impl BookingApiError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type BookingApiResult<T> = Result<T, BookingApiError>;

/// Backend booking operations used by the collector client.
pub trait BookingApi: Send + Sync {
    fn list_bookings<'a>(&'a self, query: &'a BookingListQuery) -> BoxFuture<'a, BookingApiResult<BookingPage>>;

    fn update_patients<'a>(
        &'a self,
        api_booking_id: &'a str,
        updates: &'a [BookingPatientUpdate],
    ) -> BoxFuture<'a, BookingApiResult<()>>;

    /// Idempotent on `request.event_id`.
    fn mark_sample_collected<'a>(
        &'a self,
        api_booking_id: &'a str,
        request: &'a MarkCollectedRequest,
    ) -> BoxFuture<'a, BookingApiResult<()>>;

    /// Cheap reachability probe.
    fn ping(&self) -> BoxFuture<'_, bool>;
}

/// HTTP implementation of [`BookingApi`].
#[derive(Clone)]
pub struct HttpBookingApi {
    client: Client,
    base_url: Url,
    token: String,
}

/// Gateway statuses mean the backend was not reached.
fn is_gateway_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn network_error(e: reqwest::Error) -> BookingApiError {
    warn!(error = %e, "Booking API unreachable");
    BookingApiError::Network(e.to_string())
}

impl HttpBookingApi {
    pub fn new(base_url: &str, token: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        // A trailing slash keeps `join` from dropping the last path segment.
        let mut normalized = base_url.trim_end_matches('/').to_string();
        normalized.push('/');
        let base_url = Url::parse(&normalized).context("BOOKING_API_URL is not a valid URL")?;

        tracing::info!(base_url = %base_url, "Booking API client initialized");

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> BookingApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BookingApiError::Decode(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Build the list URL with its cursor and filters.
    pub fn bookings_url(&self, query: &BookingListQuery) -> BookingApiResult<Url> {
        let mut url = self.endpoint(&format!("collectors/{}/bookings", query.collector_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("bucket", query.bucket.as_str());
            if let Some(before) = query.before_start_at {
                pairs.append_pair("before_start_at", &before.to_rfc3339());
            }
            if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
                pairs.append_pair("status", status);
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    /// Turn a non-success response into a typed error.
    async fn error_from_response(response: reqwest::Response) -> BookingApiError {
        let status = response.status();
        if is_gateway_status(status) {
            return BookingApiError::Network(format!("booking API gateway returned {}", status));
        }

        let body = response.json::<BookingApiErrorBody>().await.unwrap_or_default();
        let code = body.code.or(body.reason);
        let message = body
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Booking API error: {}", status));

        error!(status = %status, code = ?code, message = %message, "Booking API rejected request");
        BookingApiError::Rejected {
            status: status.as_u16(),
            code,
            message,
            patient_ids: body.patient_ids,
        }
    }

    async fn patch<T: serde::Serialize>(&self, url: Url, body: &T) -> BookingApiResult<()> {
        debug!(url = %url, "Booking API request");
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    #[instrument(skip(self, query), fields(collector_id = %query.collector_id, bucket = query.bucket.as_str()))]
    async fn fetch_bookings(&self, query: &BookingListQuery) -> BookingApiResult<BookingPage> {
        let url = self.bookings_url(query)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<BookingPage>().await.map_err(|e| {
            error!(error = %e, "Failed to parse booking list");
            BookingApiError::Decode(e.to_string())
        })
    }
}

impl BookingApi for HttpBookingApi {
    fn list_bookings<'a>(&'a self, query: &'a BookingListQuery) -> BoxFuture<'a, BookingApiResult<BookingPage>> {
        Box::pin(self.fetch_bookings(query))
    }

    fn update_patients<'a>(
        &'a self,
        api_booking_id: &'a str,
        updates: &'a [BookingPatientUpdate],
    ) -> BoxFuture<'a, BookingApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("bookings/{}/patients", api_booking_id))?;
            self.patch(url, &PatientUpdatesRequest { updates }).await
        })
    }

    fn mark_sample_collected<'a>(
        &'a self,
        api_booking_id: &'a str,
        request: &'a MarkCollectedRequest,
    ) -> BoxFuture<'a, BookingApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("bookings/{}/sample-collected", api_booking_id))?;
            self.patch(url, request).await
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Ok(url) = self.endpoint("health") else {
                return false;
            };
            match self
                .client
                .get(url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(response) => !is_gateway_status(response.status()),
                Err(_) => false,
            }
        })
    }
}
