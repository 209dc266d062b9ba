use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use homecollect_backend::{
    app, config,
    documents::DocumentProcessor,
    logging,
    services::{OpenAiVisionClient, VisionModel},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env, "homecollect-backend");

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting document processing server"
    );

    // Without a key the endpoint still runs and answers `document_not_configured`
    let model: Option<Arc<dyn VisionModel>> = match &settings.openai_api_key {
        Some(key) => Some(Arc::new(OpenAiVisionClient::new(
            &settings.openai_base_url,
            key,
            &settings.openai_model,
            settings.model_timeout_seconds,
        )?)),
        None => {
            tracing::warn!("OPENAI_API_KEY is not set - document processing is disabled");
            None
        }
    };

    let processor = DocumentProcessor::new(model).with_limits(
        settings.max_upload_bytes,
        Duration::from_secs(settings.model_timeout_seconds),
    );

    let state = app::AppState::new(settings.clone(), processor);
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
