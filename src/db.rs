//! Database module for flowbot
//!
//! Provides persistence for bots, conversation sessions and chat turns.

mod schema;

pub use schema::*;

use crate::flow::Flow;
use crate::session::{ChatRole, ChatTurn, Session};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Bot not found: {0}")]
    BotNotFound(String),
    #[error("Phone number {0} is already used by bot {1}")]
    PhoneNumberTaken(String, String),
}

pub type DbResult<T> = Result<T, DbError>;

const BOT_COLUMNS: &str =
    "id, name, language, whatsapp_phone_number_id, flow, created_at, updated_at";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Bot Operations ====================

    /// Create a bot or replace its published flow
    pub fn upsert_bot(&self, id: &str, draft: &BotDraft<'_>) -> DbResult<Bot> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let flow_json = serde_json::to_string(draft.flow)?;

        if let Some(phone) = draft.whatsapp_phone_number_id {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT id FROM bots WHERE whatsapp_phone_number_id = ?1 AND id != ?2",
                    params![phone, id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = owner {
                return Err(DbError::PhoneNumberTaken(phone.to_string(), owner));
            }
        }

        conn.execute(
            "INSERT INTO bots (id, name, language, whatsapp_phone_number_id, flow, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                language = excluded.language,
                whatsapp_phone_number_id = excluded.whatsapp_phone_number_id,
                flow = excluded.flow,
                updated_at = excluded.updated_at",
            params![
                id,
                draft.name,
                draft.language,
                draft.whatsapp_phone_number_id,
                flow_json,
                now
            ],
        )?;

        query_bot(&conn, "id", id)?
            .ok_or_else(|| DbError::BotNotFound(id.to_string()))
    }

    /// Get bot by ID
    pub fn get_bot(&self, id: &str) -> DbResult<Bot> {
        let conn = self.conn.lock().unwrap();
        query_bot(&conn, "id", id)?
            .ok_or_else(|| DbError::BotNotFound(id.to_string()))
    }

    /// Get the bot answering on a WhatsApp phone number
    pub fn get_bot_by_phone_number_id(&self, phone_number_id: &str) -> DbResult<Bot> {
        let conn = self.conn.lock().unwrap();
        query_bot(&conn, "whatsapp_phone_number_id", phone_number_id)?
            .ok_or_else(|| DbError::BotNotFound(phone_number_id.to_string()))
    }

    /// List bots, most recently published first
    pub fn list_bots(&self) -> DbResult<Vec<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOT_COLUMNS} FROM bots ORDER BY updated_at DESC, id"
        ))?;
        let bots = stmt
            .query_map([], parse_bot_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bots)
    }

    // ==================== Session Operations ====================

    pub fn get_session(&self, conversation_id: &str) -> DbResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let session = conn
            .query_row(
                "SELECT conversation_id, bot_id, current_step_id, created_at, updated_at
                 FROM sessions WHERE conversation_id = ?1",
                params![conversation_id],
                |row| {
                    Ok(Session {
                        conversation_id: row.get(0)?,
                        bot_id: row.get(1)?,
                        current_step_id: row.get(2)?,
                        created_at: parse_datetime(&row.get::<_, String>(3)?),
                        updated_at: parse_datetime(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn save_session(&self, session: &Session) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (conversation_id, bot_id, current_step_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id) DO UPDATE SET
                bot_id = excluded.bot_id,
                current_step_id = excluded.current_step_id,
                updated_at = excluded.updated_at",
            params![
                session.conversation_id,
                session.bot_id,
                session.current_step_id,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Forget a conversation's position and chat memory.
    /// Returns whether a session existed.
    pub fn delete_session(&self, conversation_id: &str) -> DbResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM turns WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM sessions WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // ==================== Turn Operations ====================

    /// Append a turn; returns its sequence number within the conversation
    pub fn append_turn(&self, conversation_id: &str, turn: &ChatTurn) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM turns WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO turns (conversation_id, sequence_id, role, text, step_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conversation_id,
                sequence_id,
                turn.role.as_str(),
                turn.text,
                turn.step_id,
                turn.created_at.to_rfc3339()
            ],
        )?;
        Ok(sequence_id)
    }

    /// The last `limit` turns of a conversation, oldest first
    pub fn recent_turns(&self, conversation_id: &str, limit: usize) -> DbResult<Vec<ChatTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT role, text, step_id, created_at FROM turns
             WHERE conversation_id = ?1
             ORDER BY sequence_id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut turns = stmt
            .query_map(params![conversation_id, limit], |row| {
                let role: String = row.get(0)?;
                Ok(ChatTurn {
                    role: ChatRole::parse(&role).unwrap_or(ChatRole::User),
                    text: row.get(1)?,
                    step_id: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    // ==================== Webhook Idempotency ====================

    /// Remember an inbound message id. Returns false when it was seen before.
    pub fn record_inbound(&self, message_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO inbound_receipts (message_id, received_at) VALUES (?1, ?2)",
            params![message_id, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }
}

/// Fetch one bot by a unique column
fn query_bot(conn: &Connection, column: &str, key: &str) -> DbResult<Option<Bot>> {
    let sql = format!("SELECT {BOT_COLUMNS} FROM bots WHERE {column} = ?1");
    let bot = conn.query_row(&sql, params![key], parse_bot_row).optional()?;
    Ok(bot)
}

fn parse_bot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    let flow_json: String = row.get(4)?;
    let flow: Flow = serde_json::from_str(&flow_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Bot {
        id: row.get(0)?,
        name: row.get(1)?,
        language: row.get(2)?,
        whatsapp_phone_number_id: row.get(3)?,
        flow,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
