//! Runtime for handling conversations
//!
//! Messages of one conversation are serialized through a single runtime task;
//! different conversations proceed concurrently.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{Command, ConversationRuntime};
pub use traits::*;

use crate::routing::{RouteOutcome, RoutingConfig, RoutingEngine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

/// Runtime manager used by the server
pub type AppRuntime = RuntimeManager<DatabaseStorage, Arc<dyn LlmClient>>;

const DEFAULT_IDLE_SECS: u64 = 600;

/// How often a dead runtime is replaced before giving up on a command
const MAX_DISPATCH_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Bot not found: {0}")]
    BotNotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Conversation runtime stopped before answering")]
    Stopped,
}

/// Runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub routing: RoutingConfig,
    /// Runtimes with no traffic for this long shut down
    pub idle_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_SECS),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let idle_secs = std::env::var("FLOWBOT_RUNTIME_IDLE_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|&secs: &u64| secs > 0)
            .unwrap_or(DEFAULT_IDLE_SECS);
        Self {
            routing: RoutingConfig::from_env(),
            idle_timeout: Duration::from_secs(idle_secs),
        }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TurnEvent {
    UserMessage {
        text: String,
        step_id: Option<String>,
    },
    BotReply {
        outcome: RouteOutcome,
    },
    Reset,
    Error {
        message: String,
    },
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub command_tx: mpsc::Sender<Command>,
}

/// Live runtimes and broadcast channels, shared with the runtime tasks
#[derive(Default)]
struct Registry {
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
    /// Broadcast channels outlive runtimes so SSE clients survive a respawn
    broadcasts: RwLock<HashMap<String, broadcast::Sender<TurnEvent>>>,
}

impl Registry {
    async fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<TurnEvent> {
        if let Some(tx) = self.broadcasts.read().await.get(conversation_id) {
            return tx.subscribe();
        }
        self.broadcasts
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(128).0)
            .subscribe()
    }

    /// Drop a dead runtime's handle, and the broadcast channel once nothing
    /// runs or listens on it
    async fn prune(&self, conversation_id: &str) {
        let mut runtimes = self.runtimes.write().await;
        if runtimes
            .get(conversation_id)
            .is_some_and(|h| h.command_tx.is_closed())
        {
            runtimes.remove(conversation_id);
        }
        if runtimes.contains_key(conversation_id) {
            return;
        }

        let mut broadcasts = self.broadcasts.write().await;
        if broadcasts
            .get(conversation_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            broadcasts.remove(conversation_id);
            tracing::debug!(conv_id = %conversation_id, "Conversation released");
        }
    }
}

/// Receiver of a conversation's events. Dropping it lets the manager
/// release the conversation's channel.
pub struct Subscription {
    receiver: broadcast::Receiver<TurnEvent>,
    release: ReleaseOnDrop,
}

impl Subscription {
    /// The raw receiver, plus a guard that must live as long as it
    pub fn into_parts(self) -> (broadcast::Receiver<TurnEvent>, ReleaseOnDrop) {
        (self.receiver, self.release)
    }
}

pub struct ReleaseOnDrop {
    registry: Arc<Registry>,
    conversation_id: String,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        // The receiver is dropped alongside; prune once it is gone
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(&self.registry);
            let conversation_id = std::mem::take(&mut self.conversation_id);
            rt.spawn(async move { registry.prune(&conversation_id).await });
        }
    }
}

/// Manager for all conversation runtimes
pub struct RuntimeManager<S, L>
where
    S: Storage + Clone + 'static,
    L: LlmClient + Clone + 'static,
{
    storage: S,
    engine: Arc<RoutingEngine<L>>,
    config: RuntimeConfig,
    registry: Arc<Registry>,
}

impl<S, L> RuntimeManager<S, L>
where
    S: Storage + Clone + 'static,
    L: LlmClient + Clone + 'static,
{
    pub fn new(storage: S, llm: L, config: RuntimeConfig) -> Self {
        let engine = Arc::new(RoutingEngine::new(llm, &config.routing));
        Self {
            storage,
            engine,
            config,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Route a message through the conversation's runtime
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        bot_id: &str,
        text: &str,
    ) -> Result<RouteOutcome, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(
            conversation_id,
            Command::Message {
                bot_id: bot_id.to_string(),
                text: text.to_string(),
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx.await.map_err(|_| RuntimeError::Stopped)?
    }

    /// Reset a conversation; returns whether a session existed
    pub async fn reset(&self, conversation_id: &str) -> Result<bool, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(conversation_id, Command::Reset { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| RuntimeError::Stopped)?
    }

    /// Subscribe to conversation updates. Does not start a runtime.
    pub async fn subscribe(&self, conversation_id: &str) -> Subscription {
        Subscription {
            receiver: self.registry.subscribe(conversation_id).await,
            release: ReleaseOnDrop {
                registry: Arc::clone(&self.registry),
                conversation_id: conversation_id.to_string(),
            },
        }
    }

    /// Stateless access to the router, for simulation
    pub fn engine(&self) -> &RoutingEngine<L> {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Number of live runtimes
    pub async fn active_runtimes(&self) -> usize {
        self.registry
            .runtimes
            .read()
            .await
            .values()
            .filter(|h| !h.command_tx.is_closed())
            .count()
    }

    /// Send a command, replacing the runtime when it has shut down
    async fn dispatch(&self, conversation_id: &str, mut command: Command) -> Result<(), RuntimeError> {
        for _ in 0..MAX_DISPATCH_ATTEMPTS {
            let handle = self.get_or_create(conversation_id).await;
            match handle.command_tx.send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    tracing::debug!(conv_id = %conversation_id, "Runtime gone, respawning");
                    command = returned;
                    self.registry.prune(conversation_id).await;
                }
            }
        }
        Err(RuntimeError::Stopped)
    }

    /// Get or create a runtime for a conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> ConversationHandle {
        {
            let runtimes = self.registry.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                if !handle.command_tx.is_closed() {
                    return handle.clone();
                }
            }
        }

        let mut runtimes = self.registry.runtimes.write().await;

        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(conversation_id) {
            if !handle.command_tx.is_closed() {
                return handle.clone();
            }
        }

        // Taken under the runtimes lock so a concurrent prune cannot drop it
        let broadcast_tx = self
            .registry
            .broadcasts
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(128).0)
            .clone();

        let (command_tx, command_rx) = mpsc::channel(32);
        let runtime = ConversationRuntime::new(
            conversation_id,
            self.storage.clone(),
            Arc::clone(&self.engine),
            self.config.routing.clone(),
            self.config.idle_timeout,
            command_rx,
            broadcast_tx,
        );

        let registry = Arc::clone(&self.registry);
        let id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            registry.prune(&id).await;
        });

        let handle = ConversationHandle { command_tx };
        runtimes.insert(conversation_id.to_string(), handle.clone());
        handle
    }

    /// Tracked handles and broadcast channels
    #[cfg(test)]
    async fn tracked(&self) -> (usize, usize) {
        (
            self.registry.runtimes.read().await.len(),
            self.registry.broadcasts.read().await.len(),
        )
    }
}
