//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the runtime and the router with mock
//! implementations.

use crate::db::{Database, DbError};
use crate::flow::FlowGraph;
use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry};
use crate::routing::Language;
use crate::session::{ChatTurn, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Storage for conversation position and chat memory
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, conversation_id: &str) -> Result<Option<Session>, String>;

    async fn save_session(&self, session: &Session) -> Result<(), String>;

    async fn append_turn(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), String>;

    /// Last `limit` turns, oldest first
    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>, String>;

    /// Drop position and memory; returns whether anything existed
    async fn reset_session(&self, conversation_id: &str) -> Result<bool, String>;
}

/// A bot's published flow, validated and ready to route on
#[derive(Debug, Clone)]
pub struct PublishedBot {
    pub language: Language,
    pub graph: Arc<FlowGraph>,
}

/// Source of published flows
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// `Ok(None)` when the bot does not exist
    async fn load_bot(&self, bot_id: &str) -> Result<Option<PublishedBot>, String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Combined storage trait for convenience
pub trait Storage: SessionStore + FlowStore {}
impl<T: SessionStore + FlowStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn load_session(&self, conversation_id: &str) -> Result<Option<Session>, String> {
        (**self).load_session(conversation_id).await
    }

    async fn save_session(&self, session: &Session) -> Result<(), String> {
        (**self).save_session(session).await
    }

    async fn append_turn(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), String> {
        (**self).append_turn(conversation_id, turn).await
    }

    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>, String> {
        (**self).recent_turns(conversation_id, limit).await
    }

    async fn reset_session(&self, conversation_id: &str) -> Result<bool, String> {
        (**self).reset_session(conversation_id).await
    }
}

#[async_trait]
impl<T: FlowStore + ?Sized> FlowStore for Arc<T> {
    async fn load_bot(&self, bot_id: &str) -> Result<Option<PublishedBot>, String> {
        (**self).load_bot(bot_id).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
    /// Validated graphs by bot id, tagged with the publish time they came from
    graphs: Arc<Mutex<HashMap<String, (DateTime<Utc>, Arc<FlowGraph>)>>>,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            graphs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn load_session(&self, conversation_id: &str) -> Result<Option<Session>, String> {
        self.db.get_session(conversation_id).map_err(|e| e.to_string())
    }

    async fn save_session(&self, session: &Session) -> Result<(), String> {
        self.db.save_session(session).map_err(|e| e.to_string())
    }

    async fn append_turn(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), String> {
        self.db
            .append_turn(conversation_id, turn)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>, String> {
        self.db
            .recent_turns(conversation_id, limit)
            .map_err(|e| e.to_string())
    }

    async fn reset_session(&self, conversation_id: &str) -> Result<bool, String> {
        self.db
            .delete_session(conversation_id)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl FlowStore for DatabaseStorage {
    async fn load_bot(&self, bot_id: &str) -> Result<Option<PublishedBot>, String> {
        let bot = match self.db.get_bot(bot_id) {
            Ok(bot) => bot,
            Err(DbError::BotNotFound(_)) => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let language = Language::from_tag(&bot.language);

        let cached = self
            .graphs
            .lock()
            .unwrap()
            .get(&bot.id)
            .filter(|(published, _)| *published == bot.updated_at)
            .map(|(_, graph)| Arc::clone(graph));
        if let Some(graph) = cached {
            return Ok(Some(PublishedBot { language, graph }));
        }

        let graph = Arc::new(FlowGraph::new(bot.flow).map_err(|e| format!("bot {bot_id}: {e}"))?);
        tracing::debug!(bot_id = %bot.id, steps = graph.flow().steps.len(), "Loaded published flow");
        self.graphs
            .lock()
            .unwrap()
            .insert(bot.id, (bot.updated_at, Arc::clone(&graph)));
        Ok(Some(PublishedBot { language, graph }))
    }
}

/// Adapter to use ModelRegistry as LlmClient
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }

    /// Client bound to the registry's cheap model, used for routing
    pub fn cheap(registry: Arc<ModelRegistry>) -> Self {
        let model_id = registry
            .get_cheap_model()
            .map_or_else(|| registry.default_model_id().to_string(), |m| m.model_id().to_string());
        Self::new(registry, model_id)
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::unknown("No LLM available"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
