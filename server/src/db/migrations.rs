use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Chat messages

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    sender_id TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    sender_email TEXT NOT NULL,
    sender_avatar TEXT,
    body TEXT NOT NULL,
    client_ref TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_messages_conversation_seq ON messages(conversation_id, sequence);
CREATE INDEX idx_messages_sender ON messages(sender_id);
",
        ),
        M::up(
            "-- Migration 2: Per-conversation high-water mark

-- Sequences must never be reused after a delete, so the last assigned
-- value lives outside the messages table.
CREATE TABLE conversation_state (
    conversation_id TEXT PRIMARY KEY,
    last_sequence INTEGER NOT NULL,
    last_created_at TEXT NOT NULL
);
",
        ),
    ])
}
