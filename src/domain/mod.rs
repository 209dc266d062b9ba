//! Domain types and DTOs
//!
//! Shared by the document processing endpoint, the collector-side client
//! and the offline submission queue.

pub mod bookings;
pub mod documents;
pub mod queue;

// Re-export commonly used types
pub use bookings::*;
pub use documents::*;
pub use queue::*;
