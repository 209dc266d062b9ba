//! Home sample-collection backend.
//!
//! The server half processes identity document photos through a vision
//! model. The client half captures documents, edits patient records and
//! keeps sample submissions in an offline queue until the booking API is
//! reachable.

pub mod app;
pub mod client;
pub mod config;
pub mod documents;
pub mod domain;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod services;
