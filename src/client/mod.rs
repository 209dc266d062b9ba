//! Collector-side pipeline: document capture, patient edits and the offline
//! submission queue.

pub mod connectivity;
pub mod document_client;
pub mod image_optimizer;
pub mod orchestrator;
pub mod queue;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod fakes;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientSettings;
use crate::services::booking_api::{BookingApi, HttpBookingApi};
use crate::services::telemetry::{TelemetrySink, TracingTelemetry};

pub use connectivity::ConnectivityMonitor;
pub use document_client::{DocumentProcessingClient, DocumentProcessingError, HttpDocumentTransport};
pub use image_optimizer::ImageFile;
pub use orchestrator::{BookingsOrchestrator, SubmissionDraft, SubmissionError, SubmissionOutcome};
pub use queue::{FileQueueStore, QueueStore, RedisQueueStore, SampleSubmissionQueue};

/// Wired collector services sharing one booking API client and one queue.
pub struct CollectorRuntime {
    pub api: Arc<dyn BookingApi>,
    pub documents: Arc<DocumentProcessingClient>,
    pub queue: Arc<SampleSubmissionQueue>,
    pub connectivity: ConnectivityMonitor,
}

impl CollectorRuntime {
    /// Build the runtime from settings. The queue lives in Redis when
    /// `QUEUE_REDIS_URL` is set, otherwise in a file under `QUEUE_DIR`.
    pub async fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let api: Arc<dyn BookingApi> = Arc::new(HttpBookingApi::new(
            &settings.booking_api_url,
            &settings.booking_api_token,
            settings.booking_api_timeout_seconds,
        )?);

        let store: Arc<dyn QueueStore> = match &settings.queue_redis_url {
            Some(url) => Arc::new(RedisQueueStore::new(url).await?),
            None => {
                let store = FileQueueStore::new(&settings.queue_dir);
                tracing::info!(path = %store.path().display(), "Using file queue store");
                Arc::new(store)
            }
        };

        let transport = Arc::new(HttpDocumentTransport::new(
            &settings.document_proxy_url,
            settings.document_client_timeout_seconds,
        )?);
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);

        Ok(Self {
            documents: Arc::new(
                DocumentProcessingClient::new(transport, telemetry)
                    .with_attempt_timeout(Duration::from_secs(settings.document_client_timeout_seconds)),
            ),
            queue: Arc::new(SampleSubmissionQueue::new(store, api.clone())),
            connectivity: ConnectivityMonitor::new(false),
            api,
        })
    }

    pub fn orchestrator(&self, collector_id: impl Into<String>) -> BookingsOrchestrator {
        BookingsOrchestrator::new(
            collector_id,
            self.api.clone(),
            self.documents.clone(),
            self.queue.clone(),
        )
    }
}
