//! flowbot - WhatsApp bot conversation router
//!
//! Serves published conversation flows: each inbound message is matched to
//! a transition by label, by model-classified intent, or answered with a
//! fallback reply that keeps the user on the current step.

mod api;
mod db;
mod flow;
mod llm;
mod routing;
mod runtime;
mod session;
mod whatsapp;

use api::{create_router, AppState};
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use runtime::RuntimeConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whatsapp::WhatsAppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowbot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("FLOWBOT_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.flowbot/flowbot.db")
    });

    let port: u16 = std::env::var("FLOWBOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!(
            "No LLM API keys configured. Set OPENAI_API_KEY, FIREWORKS_API_KEY or LLM_GATEWAY. \
             Only exact button labels will route."
        );
    }

    let whatsapp_config = WhatsAppConfig::from_env();
    if whatsapp_config.access_token.is_none() {
        tracing::warn!("WHATSAPP_ACCESS_TOKEN not set; WhatsApp replies will not be delivered");
    }

    let runtime_config = RuntimeConfig::from_env();
    tracing::info!(
        classify_attempts = runtime_config.routing.classify_attempts,
        history_turns = runtime_config.routing.history_turns,
        default_language = %runtime_config.routing.default_language,
        idle_secs = runtime_config.idle_timeout.as_secs(),
        "Runtime configured"
    );

    let state = AppState::new(db, llm_registry, runtime_config, &whatsapp_config)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state).layer(cors).layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("flowbot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
