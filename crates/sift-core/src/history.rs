//! Token-budgeted conversation history backed by SQLite.
//!
//! Messages are append-only per session. They leave the store only through
//! [`ConversationStore::trim_conversation`] (oldest first) or the clear
//! operations. All access goes through one connection behind a mutex, so
//! writers on the same session are serialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::tokens::TokenCounter;
use crate::types::{Message, Role};

/// Errors from the conversation store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable per-session message log with token accounting.
pub struct ConversationStore {
    conn: Mutex<Connection>,
    counter: Arc<TokenCounter>,
    tokenizer_model: String,
    db_path: Option<PathBuf>,
}

impl ConversationStore {
    /// Open (or create) a store at `db_path`.
    pub fn open(
        db_path: impl AsRef<Path>,
        counter: Arc<TokenCounter>,
        tokenizer_model: impl Into<String>,
    ) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "Opened conversation store");

        Ok(Self {
            conn: Mutex::new(conn),
            counter,
            tokenizer_model: tokenizer_model.into(),
            db_path: Some(db_path),
        })
    }

    /// A store that lives only as long as this value.
    pub fn in_memory(
        counter: Arc<TokenCounter>,
        tokenizer_model: impl Into<String>,
    ) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            counter,
            tokenizer_model: tokenizer_model.into(),
            db_path: None,
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                metadata TEXT,
                token_count INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_session
                ON conversations(session_id, timestamp, id);
            ",
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Append a message, counting its tokens if the caller did not.
    ///
    /// Returns the token count stored for the message.
    pub fn add_message(&self, session_id: &str, message: &Message) -> StoreResult<u32> {
        let token_count = message
            .token_count
            .unwrap_or_else(|| self.counter.count(&message.content, &self.tokenizer_model));
        let metadata = serde_json::to_string(&message.metadata)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (session_id, role, content, timestamp, metadata, token_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                message.role.as_str(),
                message.content,
                format_timestamp(&message.timestamp),
                metadata,
                i64::from(token_count),
            ],
        )?;

        tracing::debug!(session_id, role = message.role.as_str(), token_count, "Stored message");
        Ok(token_count)
    }

    /// Most recent messages that fit the budget, in chronological order.
    ///
    /// The scan runs newest first and stops at the first message that would
    /// push the running total above `max_tokens`; older messages are never
    /// considered after that point. `limit` bounds how far back the scan
    /// looks.
    pub fn get_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
        max_tokens: Option<u64>,
    ) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp, metadata, token_count
             FROM conversations
             WHERE session_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;

        // LIMIT -1 means no limit in SQLite
        let limit = limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut rows = stmt.query(params![session_id, limit])?;
        let mut messages = Vec::new();
        let mut total: u64 = 0;

        while let Some(row) = rows.next()? {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            let timestamp: String = row.get(2)?;
            let metadata: Option<String> = row.get(3)?;
            let stored_count: Option<i64> = row.get(4)?;

            let token_count = match stored_count {
                Some(n) => u32::try_from(n)
                    .map_err(|_| StoreError::Corrupt(format!("token_count out of range: {n}")))?,
                None => self.counter.count(&content, &self.tokenizer_model),
            };

            if let Some(budget) = max_tokens {
                if total + u64::from(token_count) > budget {
                    break;
                }
            }

            let role = Role::parse(&role)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role: {role}")))?;
            let metadata = match metadata {
                Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
                _ => serde_json::Value::Object(Default::default()),
            };

            messages.push(Message {
                role,
                content,
                timestamp: parse_timestamp(&timestamp)?,
                metadata,
                token_count: Some(token_count),
            });
            total += u64::from(token_count);
        }

        messages.reverse();
        Ok(messages)
    }

    /// Sum of stored token counts for a session, `0` if unknown.
    pub fn get_session_token_count(&self, session_id: &str) -> StoreResult<u64> {
        let conn = self.conn.lock();
        session_token_count(&conn, session_id)
    }

    /// Delete the oldest messages until the session fits `max_tokens`.
    ///
    /// The total is re-read after every deletion. Returns how many messages
    /// were removed.
    pub fn trim_conversation(&self, session_id: &str, max_tokens: u64) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let mut removed = 0;

        while session_token_count(&conn, session_id)? > max_tokens {
            let deleted = conn.execute(
                "DELETE FROM conversations
                 WHERE id = (
                     SELECT id FROM conversations
                     WHERE session_id = ?1
                     ORDER BY timestamp ASC, id ASC
                     LIMIT 1
                 )",
                params![session_id],
            )?;

            if deleted == 0 {
                break;
            }
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(session_id, removed, max_tokens, "Trimmed conversation history");
        }
        Ok(removed)
    }

    /// Delete one session's history.
    pub fn clear_session(&self, session_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM conversations WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted)
    }

    /// Delete every session's history.
    pub fn clear_all(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM conversations", [])?;
        Ok(deleted)
    }
}

fn session_token_count(conn: &Connection, session_id: &str) -> StoreResult<u64> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(token_count), 0) FROM conversations WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(sum).unwrap_or(0))
}

// Fixed-width UTC timestamps sort lexically in chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
