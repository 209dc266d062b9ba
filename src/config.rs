use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Settings for the document processing server.
#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Vision model
    /// Missing key is not a startup error: uploads answer `document_not_configured`.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub model_timeout_seconds: u64,

    // Uploads
    pub max_upload_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Vision model
        let openai_api_key = non_empty_env("OPENAI_API_KEY");
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let model_timeout_seconds = env_or("DOCUMENT_MODEL_TIMEOUT_SECONDS", 30);

        // Uploads
        let max_upload_bytes = env_or("MAX_UPLOAD_BYTES", 8 * 1024 * 1024);

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            openai_api_key,
            openai_base_url,
            openai_model,
            model_timeout_seconds,
            max_upload_bytes,
        })
    }
}

/// Settings for the collector-side client (document scans and offline sync).
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub env: Environment,

    // Document proxy
    pub document_proxy_url: String,
    pub document_client_timeout_seconds: u64,

    // Booking API
    pub booking_api_url: String,
    /// Bearer token issued by the identity provider.
    pub booking_api_token: String,
    pub booking_api_timeout_seconds: u64,

    // Offline queue
    pub queue_dir: PathBuf,
    /// When set, the queue is kept in Redis instead of a local file.
    pub queue_redis_url: Option<String>,
    pub queue_sync_interval_seconds: u64,
    pub connectivity_probe_seconds: u64,
}

impl ClientSettings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));

        // Document proxy
        let document_proxy_url = env::var("DOCUMENT_PROXY_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let document_client_timeout_seconds = env_or("DOCUMENT_CLIENT_TIMEOUT_SECONDS", 16);

        // Booking API
        let booking_api_url = env::var("BOOKING_API_URL").context("BOOKING_API_URL must be set")?;
        let booking_api_token =
            env::var("BOOKING_API_TOKEN").context("BOOKING_API_TOKEN must be set")?;
        let booking_api_timeout_seconds = env_or("BOOKING_API_TIMEOUT_SECONDS", 20);

        // Offline queue
        let queue_dir = env::var("QUEUE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let queue_redis_url = non_empty_env("QUEUE_REDIS_URL");
        let queue_sync_interval_seconds = env_or("QUEUE_SYNC_INTERVAL_SECONDS", 30);
        let connectivity_probe_seconds = env_or("CONNECTIVITY_PROBE_SECONDS", 10);

        Ok(ClientSettings {
            env,
            document_proxy_url,
            document_client_timeout_seconds,
            booking_api_url,
            booking_api_token,
            booking_api_timeout_seconds,
            queue_dir,
            queue_redis_url,
            queue_sync_interval_seconds,
            connectivity_probe_seconds,
        })
    }
}
