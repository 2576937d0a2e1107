//! Conversation runtime executor
//!
//! One runtime task per conversation. Commands arrive over an mpsc channel
//! and are handled one at a time, so a conversation's position only ever
//! moves in message arrival order.

use super::traits::{LlmClient, Storage};
use super::{RuntimeError, TurnEvent};
use crate::routing::{RouteOutcome, RouteRequest, RoutingConfig, RoutingEngine};
use crate::session::{ChatTurn, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Work for a conversation runtime
#[derive(Debug)]
pub enum Command {
    /// Route an inbound message for a bot
    Message {
        bot_id: String,
        text: String,
        reply: oneshot::Sender<Result<RouteOutcome, RuntimeError>>,
    },
    /// Forget position and chat memory
    Reset {
        reply: oneshot::Sender<Result<bool, RuntimeError>>,
    },
}

/// Generic conversation runtime that can work with any storage and LLM implementations
pub struct ConversationRuntime<S, L>
where
    S: Storage + Clone + 'static,
    L: LlmClient + Clone + 'static,
{
    conversation_id: String,
    storage: S,
    engine: Arc<RoutingEngine<L>>,
    config: RoutingConfig,
    idle_timeout: Duration,
    command_rx: mpsc::Receiver<Command>,
    broadcast_tx: broadcast::Sender<TurnEvent>,
}

impl<S, L> ConversationRuntime<S, L>
where
    S: Storage + Clone + 'static,
    L: LlmClient + Clone + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: impl Into<String>,
        storage: S,
        engine: Arc<RoutingEngine<L>>,
        config: RoutingConfig,
        idle_timeout: Duration,
        command_rx: mpsc::Receiver<Command>,
        broadcast_tx: broadcast::Sender<TurnEvent>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            storage,
            engine,
            config,
            idle_timeout,
            command_rx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.conversation_id, "Starting conversation runtime");

        loop {
            match tokio::time::timeout(self.idle_timeout, self.command_rx.recv()).await {
                Ok(Some(command)) => self.process_command(command).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new work, then finish what was queued before the close
                    self.command_rx.close();
                    while let Ok(command) = self.command_rx.try_recv() {
                        self.process_command(command).await;
                    }
                    tracing::debug!(conv_id = %self.conversation_id, "Conversation runtime idle");
                    break;
                }
            }
        }

        tracing::info!(conv_id = %self.conversation_id, "Conversation runtime stopped");
    }

    async fn process_command(&mut self, command: Command) {
        match command {
            Command::Message {
                bot_id,
                text,
                reply,
            } => {
                let result = self.handle_message(&bot_id, &text).await;
                if let Err(e) = &result {
                    tracing::error!(conv_id = %self.conversation_id, bot_id = %bot_id, error = %e, "Error handling message");
                    let _ = self.broadcast_tx.send(TurnEvent::Error {
                        message: e.to_string(),
                    });
                }
                // Caller may have gone away; the turn is stored either way
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                let result = self
                    .storage
                    .reset_session(&self.conversation_id)
                    .await
                    .map_err(RuntimeError::Storage);
                if matches!(result, Ok(true)) {
                    tracing::info!(conv_id = %self.conversation_id, "Session reset");
                    let _ = self.broadcast_tx.send(TurnEvent::Reset);
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_message(&self, bot_id: &str, text: &str) -> Result<RouteOutcome, RuntimeError> {
        let bot = self
            .storage
            .load_bot(bot_id)
            .await
            .map_err(RuntimeError::Storage)?
            .ok_or_else(|| RuntimeError::BotNotFound(bot_id.to_string()))?;

        let mut session = match self
            .storage
            .load_session(&self.conversation_id)
            .await
            .map_err(RuntimeError::Storage)?
        {
            Some(session) if session.bot_id == bot_id => session,
            Some(session) => {
                tracing::info!(
                    conv_id = %self.conversation_id,
                    previous_bot = %session.bot_id,
                    bot_id = %bot_id,
                    "Conversation switched bots, starting over"
                );
                // The previous bot's turns must not reach the new bot's classifier
                self.storage
                    .reset_session(&self.conversation_id)
                    .await
                    .map_err(RuntimeError::Storage)?;
                Session::new(&self.conversation_id, bot_id)
            }
            None => Session::new(&self.conversation_id, bot_id),
        };

        let current = match session.current_step_id.clone() {
            Some(step) if bot.graph.contains(&step) => Some(step),
            Some(step) => {
                tracing::warn!(
                    conv_id = %self.conversation_id,
                    step = %step,
                    "Stored step no longer exists in published flow, restarting"
                );
                None
            }
            None => None,
        };

        let history = match current {
            Some(_) => self
                .storage
                .recent_turns(&self.conversation_id, self.config.history_turns)
                .await
                .map_err(RuntimeError::Storage)?,
            None => Vec::new(),
        };

        let _ = self.broadcast_tx.send(TurnEvent::UserMessage {
            text: text.to_string(),
            step_id: current.clone(),
        });

        let outcome = self
            .engine
            .route(RouteRequest {
                graph: &bot.graph,
                current_step_id: current.as_deref(),
                message: text,
                language: bot.language,
                history: &history,
            })
            .await;

        self.storage
            .append_turn(&self.conversation_id, &ChatTurn::user(text, current))
            .await
            .map_err(RuntimeError::Storage)?;
        self.storage
            .append_turn(
                &self.conversation_id,
                &ChatTurn::bot(&outcome.reply, &outcome.next_step_id),
            )
            .await
            .map_err(RuntimeError::Storage)?;

        session.advance_to(&outcome.next_step_id);
        self.storage
            .save_session(&session)
            .await
            .map_err(RuntimeError::Storage)?;

        let _ = self.broadcast_tx.send(TurnEvent::BotReply {
            outcome: outcome.clone(),
        });

        Ok(outcome)
    }
}
