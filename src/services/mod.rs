//! Clients for external services.
//!
//! Contains the vision model client, the booking API client and the
//! telemetry sinks.

pub mod booking_api;
pub mod telemetry;
pub mod vision_client;

pub use booking_api::{BookingApi, BookingApiError, HttpBookingApi};
pub use telemetry::{TelemetrySink, TracingTelemetry};
pub use vision_client::{OpenAiVisionClient, VisionModel};
