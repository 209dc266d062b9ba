//! Identity document processing.
//!
//! - `normalize`: untrusted decoding of model output
//! - `prompt`: extraction instructions and output schema
//! - `rules`: document-type business rules
//! - `processor`: the server-side pipeline behind the upload endpoint

pub mod normalize;
pub mod processor;
pub mod prompt;
pub mod rules;

pub use processor::{DocumentProcessor, UploadedImage, MAX_UPLOAD_BYTES};
pub use rules::{assess_scan, ScanClarity, ScanRejection};
