use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::documents::DocumentProcessor;
use crate::middleware::{request_id_layer, X_REQUEST_ID};
use crate::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub processor: DocumentProcessor,
}

impl AppState {
    pub fn new(settings: Settings, processor: DocumentProcessor) -> Arc<Self> {
        Arc::new(Self { settings, processor })
    }
}

/// Router plus middleware.
pub fn create_app(state: Arc<AppState>) -> Router {
    let (set_request_id, propagate_request_id) = request_id_layer();

    // Uploads over the limit must still reach the handler to get a
    // `file_too_large` payload rather than a bare 413.
    let body_limit = state.processor.max_upload_bytes().saturating_mul(2);

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));
    let cors = cors_layer(&state.settings);

    // Applied bottom-up: CORS is outermost, the body limit innermost.
    Router::new()
        .merge(routes::api_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(propagate_request_id)
        .layer(trace)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Browsers in dev re-send preflights constantly
    let max_age = Duration::from_secs(if settings.env.is_dev() { 86_400 } else { 3_600 });
    let request_id = HeaderName::from_static(X_REQUEST_ID);

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            request_id.clone(),
        ]))
        .expose_headers([request_id])
        .allow_credentials(true)
        .max_age(max_age)
}
