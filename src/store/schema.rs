//! Table layout of the archive database, versioned through `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{ArchiveError, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    sender TEXT NOT NULL DEFAULT '',
    recipients TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    rich_content TEXT NOT NULL DEFAULT '',
    has_attachments INTEGER NOT NULL DEFAULT 0,
    category TEXT NOT NULL DEFAULT '',
    is_conversation INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS attachments (
    message_id TEXT NOT NULL,
    attachment_id TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    thread_id INTEGER NOT NULL,
    conversation_id INTEGER NOT NULL,
    date TEXT NOT NULL DEFAULT '',
    participants TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (thread_id, conversation_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_category ON messages(category);
CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date);
CREATE INDEX IF NOT EXISTS idx_attachments_message_id ON attachments(message_id);
"#;

/// Bring the database up to [`SCHEMA_VERSION`].
///
/// A database written by a newer build is refused.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(ArchiveError::Schema(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(version = SCHEMA_VERSION, "Applied archive schema");
    }
    Ok(())
}

/// Current `PRAGMA user_version`.
pub fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
