//! Conversation position and short-term chat memory
//!
//! A session records where one end user currently is in a bot's flow. The
//! routing engine never owns it: the runtime loads it, passes the position in
//! and stores whatever the engine decided.

use crate::llm::LlmMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who said a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Bot,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Bot => "bot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "bot" => Some(ChatRole::Bot),
            _ => None,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    /// Step the conversation was at when the turn was recorded
    pub step_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>, step_id: Option<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            step_id,
            created_at: Utc::now(),
        }
    }

    pub fn bot(text: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Bot,
            text: text.into(),
            step_id: Some(step_id.into()),
            created_at: Utc::now(),
        }
    }

    pub fn to_llm_message(&self) -> LlmMessage {
        match self.role {
            ChatRole::User => LlmMessage::user(&self.text),
            ChatRole::Bot => LlmMessage::assistant(&self.text),
        }
    }
}

/// Position of one end user in one bot's flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub conversation_id: String,
    pub bot_id: String,
    /// `None` until the conversation has entered the flow
    pub current_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(conversation_id: impl Into<String>, bot_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            bot_id: bot_id.into(),
            current_step_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a step and bump `updated_at`
    pub fn advance_to(&mut self, step_id: impl Into<String>) {
        self.current_step_id = Some(step_id.into());
        self.updated_at = Utc::now();
    }
}
