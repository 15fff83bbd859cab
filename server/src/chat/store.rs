//! Message Store Gateway: the persistence boundary for chat messages.
//!
//! All methods are synchronous (rusqlite) and are expected to run inside
//! `tokio::task::spawn_blocking`.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{OptionalExtension, Transaction};
use wanderchat_shared::{ChatError, ConversationId, Message, Role, Sender, SenderProfile};

use crate::db::DbPool;

/// Maximum length of a client correlation id.
const MAX_CLIENT_REF_LENGTH: usize = 128;

/// Row in the `messages` table.
#[derive(Debug, Clone)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sequence: i64,
    sender_id: String,
    sender_role: String,
    sender_name: String,
    sender_email: String,
    sender_avatar: Option<String>,
    body: String,
    client_ref: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sequence: row.get(2)?,
            sender_id: row.get(3)?,
            sender_role: row.get(4)?,
            sender_name: row.get(5)?,
            sender_email: row.get(6)?,
            sender_avatar: row.get(7)?,
            body: row.get(8)?,
            client_ref: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_message(self) -> Result<Message, ChatError> {
        let role: Role = self.sender_role.parse()?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| ChatError::Internal(format!("bad created_at on {}: {}", self.id, e)))?
            .with_timezone(&Utc);

        Ok(Message {
            id: self.id,
            body: self.body,
            sender: Sender::new(
                role,
                SenderProfile {
                    id: self.sender_id,
                    name: self.sender_name,
                    email: self.sender_email,
                    avatar: self.sender_avatar,
                },
            ),
            conversation_id: ConversationId::parse(&self.conversation_id)?,
            created_at,
            sequence: self.sequence as u64,
            client_ref: self.client_ref,
        })
    }
}

const SELECT_COLUMNS: &str = "id, conversation_id, sequence, sender_id, sender_role, sender_name,
     sender_email, sender_avatar, body, client_ref, created_at";

fn db_err(e: rusqlite::Error) -> ChatError {
    ChatError::Internal(format!("database error: {}", e))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed width so stored timestamps also compare correctly as text
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed message store.
#[derive(Clone)]
pub struct MessageStore {
    db: DbPool,
    max_body_chars: usize,
}

impl MessageStore {
    pub fn new(db: DbPool, max_body_chars: usize) -> Self {
        Self { db, max_body_chars }
    }

    /// Persist a new message and assign its id, sequence and timestamp.
    ///
    /// The body is trimmed before storage. `created_at` never goes backwards
    /// within a conversation, even if the wall clock does.
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        sender: &Sender,
        body: &str,
        client_ref: Option<&str>,
    ) -> Result<Message, ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::Validation("message body must not be empty".to_string()));
        }
        if body.chars().count() > self.max_body_chars {
            return Err(ChatError::Validation(format!(
                "message body exceeds {} characters",
                self.max_body_chars
            )));
        }
        if let Some(r) = client_ref {
            if r.is_empty() || r.len() > MAX_CLIENT_REF_LENGTH {
                return Err(ChatError::Validation("invalid client reference".to_string()));
            }
        }
        if !conversation_id.includes(sender.id()) {
            return Err(ChatError::NotAuthorized(
                "sender is not a participant of this conversation".to_string(),
            ));
        }

        let mut conn = self
            .db
            .lock()
            .map_err(|_| ChatError::Internal("DB lock poisoned".to_string()))?;
        let tx = conn.transaction().map_err(db_err)?;

        let (sequence, created_at) = next_slot(&tx, conversation_id)?;
        let id = uuid::Uuid::now_v7().to_string();
        let profile = sender.profile();

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sequence, sender_id, sender_role, sender_name,
                                   sender_email, sender_avatar, body, client_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                id,
                conversation_id.as_str(),
                sequence,
                profile.id,
                sender.role().as_str(),
                profile.name,
                profile.email,
                profile.avatar,
                body,
                client_ref,
                format_timestamp(&created_at),
            ],
        )
        .map_err(db_err)?;

        tx.execute(
            "INSERT INTO conversation_state (conversation_id, last_sequence, last_created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET last_sequence = ?2, last_created_at = ?3",
            rusqlite::params![conversation_id.as_str(), sequence, format_timestamp(&created_at)],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(Message {
            id,
            body: body.to_string(),
            sender: sender.clone(),
            conversation_id: conversation_id.clone(),
            created_at,
            sequence: sequence as u64,
            client_ref: client_ref.map(str::to_string),
        })
    }

    /// All messages of a conversation, oldest first.
    pub fn list_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| ChatError::Internal("DB lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY sequence ASC",
                SELECT_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(rusqlite::params![conversation_id.as_str()], MessageRow::from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    pub fn get(&self, message_id: &str) -> Result<Message, ChatError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| ChatError::Internal("DB lock poisoned".to_string()))?;

        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", SELECT_COLUMNS),
            rusqlite::params![message_id],
            MessageRow::from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?
        .into_message()
    }

    /// Delete a message on behalf of its sender.
    ///
    /// Returns the conversation the message belonged to so the caller knows
    /// which room to notify.
    pub fn remove(&self, message_id: &str, requester_id: &str) -> Result<ConversationId, ChatError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| ChatError::Internal("DB lock poisoned".to_string()))?;

        let (sender_id, conversation_id): (String, String) = conn
            .query_row(
                "SELECT sender_id, conversation_id FROM messages WHERE id = ?1",
                rusqlite::params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;

        if sender_id != requester_id {
            return Err(ChatError::NotAuthorized(
                "only the sender can delete a message".to_string(),
            ));
        }

        conn.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![message_id])
            .map_err(db_err)?;

        ConversationId::parse(&conversation_id)
    }
}

/// Next sequence number and timestamp for a conversation.
fn next_slot(
    tx: &Transaction<'_>,
    conversation_id: &ConversationId,
) -> Result<(i64, DateTime<Utc>), ChatError> {
    let last: Option<(i64, String)> = tx
        .query_row(
            "SELECT last_sequence, last_created_at FROM conversation_state WHERE conversation_id = ?1",
            rusqlite::params![conversation_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;

    // Stored precision, so pushed and fetched copies carry the same instant
    let now = Utc::now().trunc_subsecs(6);
    match last {
        Some((seq, last_created_at)) => {
            let last_ts = DateTime::parse_from_rfc3339(&last_created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(now);
            Ok((seq + 1, now.max(last_ts)))
        }
        None => Ok((1, now)),
    }
}
