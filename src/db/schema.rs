//! Database schema and types

use crate::flow::Flow;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS bots (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT 'he',
    whatsapp_phone_number_id TEXT UNIQUE,
    flow TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    conversation_id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    current_step_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_bot ON sessions(bot_id);

CREATE TABLE IF NOT EXISTS turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    text TEXT NOT NULL,
    step_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, sequence_id);

CREATE TABLE IF NOT EXISTS inbound_receipts (
    message_id TEXT PRIMARY KEY,
    received_at TEXT NOT NULL
);
";

/// A bot and its published flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub id: String,
    pub name: String,
    /// Language tag, see [`crate::routing::Language::from_tag`]
    pub language: String,
    /// WhatsApp Cloud API phone number the bot answers on
    pub whatsapp_phone_number_id: Option<String>,
    pub flow: Flow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a publish writes
#[derive(Debug, Clone)]
pub struct BotDraft<'a> {
    pub name: &'a str,
    pub language: &'a str,
    pub whatsapp_phone_number_id: Option<&'a str>,
    pub flow: &'a Flow,
}
