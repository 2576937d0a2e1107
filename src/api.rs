//! HTTP API for flowbot
//!
//! Flow simulation and validation, bot publishing, stored conversations with
//! live updates, and the WhatsApp webhook.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::runtime::{AppRuntime, DatabaseStorage, LlmClient, RegistryLlmClient, RuntimeConfig, RuntimeManager};
use crate::whatsapp::{WhatsAppClient, WhatsAppConfig};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AppRuntime>,
    pub db: Database,
    pub llm_registry: Arc<ModelRegistry>,
    pub whatsapp: Arc<WhatsAppClient>,
    pub verify_token: Option<String>,
    /// Model the router consults
    pub routing_model: String,
}

impl AppState {
    /// Routes with the registry's cheap model
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        runtime_config: RuntimeConfig,
        whatsapp_config: &WhatsAppConfig,
    ) -> Result<Self, String> {
        let llm: Arc<dyn LlmClient> = Arc::new(RegistryLlmClient::cheap(llm_registry.clone()));
        Self::with_llm(db, llm_registry, llm, runtime_config, whatsapp_config)
    }

    pub fn with_llm(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        llm: Arc<dyn LlmClient>,
        runtime_config: RuntimeConfig,
        whatsapp_config: &WhatsAppConfig,
    ) -> Result<Self, String> {
        let storage = DatabaseStorage::new(db.clone());
        let routing_model = llm.model_id().to_string();
        Ok(Self {
            runtime: Arc::new(RuntimeManager::new(storage, llm, runtime_config)),
            db,
            llm_registry,
            whatsapp: Arc::new(WhatsAppClient::new(whatsapp_config)?),
            verify_token: whatsapp_config.verify_token.clone(),
            routing_model,
        })
    }
}
