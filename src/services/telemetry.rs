//! Per-call API telemetry.
//!
//! Recording is fire-and-forget: a sink must never fail the call it measures.

use parking_lot::Mutex;
use std::time::Duration;

/// One measured call to a remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCallRecord {
    pub endpoint: &'static str,
    pub duration: Duration,
    pub success: bool,
    /// HTTP status when one was received.
    pub status: Option<u16>,
    /// Failure reason code, e.g. `timeout`.
    pub error_code: Option<String>,
    pub document_type: Option<String>,
    pub attempt: u32,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: ApiCallRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, record: ApiCallRecord) {
        tracing::info!(
            target: "homecollect_backend::telemetry",
            endpoint = record.endpoint,
            duration_ms = record.duration.as_millis() as u64,
            success = record.success,
            status = ?record.status,
            error_code = ?record.error_code,
            document_type = ?record.document_type,
            attempt = record.attempt,
            "api call"
        );
    }
}

/// Keeps records in memory. Used to inspect recent calls.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<ApiCallRecord>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ApiCallRecord> {
        self.records.lock().clone()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, record: ApiCallRecord) {
        self.records.lock().push(record);
    }
}
