//! SQLite-backed [`MailStore`].

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{ArchiveError, Result};
use crate::model::attachment::Attachment;
use crate::model::conversation::Conversation;
use crate::model::mail::{Message, MessageContent, MessageSummary};
use crate::reconcile;
use crate::store::schema;
use crate::store::{MailStore, MessageFilter};

const PAGES_PER_STEP: i32 = 256;
const PAUSE_BETWEEN_STEPS: Duration = Duration::from_millis(0);

const MESSAGE_COLUMNS: &str = "message_id, sender, recipients, subject, date, content, \
rich_content, has_attachments, category, is_conversation";

/// Archive store on a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        schema::migrate(&conn)?;
        debug!(path = %path.display(), "Opened archive store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Map a constraint violation on insert to [`ArchiveError::DuplicateKey`].
fn insert_error(err: rusqlite::Error, key: impl FnOnce() -> String) -> ArchiveError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            ArchiveError::DuplicateKey(key())
        }
        _ => ArchiveError::Storage(err),
    }
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn contains_pattern(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| format!("%{}%", escape_like(v)))
}

/// Category filter value with trailing slashes removed; `None` for the root.
fn category_filter(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|c| c.trim().trim_end_matches('/'))
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn insert_message_row(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            message.id,
            message.sender,
            message.recipients,
            message.subject,
            message.date,
            message.content,
            message.rich_content,
            message.has_attachments,
            message.category,
            message.is_conversation,
        ],
    )
    .map_err(|e| insert_error(e, || message.id.clone()))?;
    Ok(())
}

fn insert_attachment_row(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        "INSERT INTO attachments (message_id, attachment_id, data) VALUES (?1, ?2, ?3)",
        params![attachment.message_id, attachment.attachment_id, attachment.data],
    )?;
    Ok(())
}

/// `true` if both paths name the same file once symlinks and `.` are resolved.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl Message {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("message_id")?,
            sender: row.get("sender")?,
            recipients: row.get("recipients")?,
            subject: row.get("subject")?,
            date: row.get("date")?,
            content: row.get("content")?,
            rich_content: row.get("rich_content")?,
            has_attachments: row.get("has_attachments")?,
            category: row.get("category")?,
            is_conversation: row.get("is_conversation")?,
        })
    }
}

impl MessageSummary {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("message_id")?,
            sender: row.get("sender")?,
            recipients: row.get("recipients")?,
            subject: row.get("subject")?,
            date: row.get("date")?,
            has_attachments: row.get("has_attachments")?,
        })
    }
}

impl Conversation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            thread_id: row.get("thread_id")?,
            conversation_id: row.get("conversation_id")?,
            date: row.get("date")?,
            participants: row.get("participants")?,
            content: row.get("content")?,
        })
    }
}

impl MailStore for SqliteStore {
    fn insert_message(&self, message: &Message) -> Result<()> {
        insert_message_row(&self.conn, message)
    }

    fn insert_attachment(&self, attachment: &Attachment) -> Result<()> {
        insert_attachment_row(&self.conn, attachment)
    }

    fn insert_mail(&mut self, message: &Message, attachments: &[Attachment]) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_message_row(&tx, message)?;
        for attachment in attachments {
            insert_attachment_row(&tx, attachment)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO conversations (thread_id, conversation_id, date, participants, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation.thread_id,
                    conversation.conversation_id,
                    conversation.date,
                    conversation.participants,
                    conversation.content,
                ],
            )
            .map_err(|e| {
                insert_error(e, || {
                    format!("{}/{}", conversation.thread_id, conversation.conversation_id)
                })
            })?;
        Ok(())
    }

    fn message_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT message_id FROM messages")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    fn conversation_ids(&self) -> Result<HashSet<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT thread_id, conversation_id FROM conversations")?;
        let ids = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashSet<(i64, i64)>>>()?;
        Ok(ids)
    }

    fn categories(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT category FROM messages")?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(categories)
    }

    fn messages(&self, filter: &MessageFilter) -> Result<Vec<MessageSummary>> {
        let category = category_filter(&filter.category);
        let category_children = category.as_deref().map(|c| format!("{}/%", escape_like(c)));

        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, sender, recipients, subject, date, has_attachments
            FROM messages
            WHERE (?1 IS NULL OR category = ?1 OR category LIKE ?2 ESCAPE '\')
              AND (?3 IS NULL OR sender LIKE ?3 ESCAPE '\')
              AND (?4 IS NULL OR recipients LIKE ?4 ESCAPE '\')
              AND (?5 IS NULL OR subject LIKE ?5 ESCAPE '\')
              AND (?6 IS NULL OR content LIKE ?6 ESCAPE '\')
            ORDER BY date DESC, message_id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    category,
                    category_children,
                    contains_pattern(&filter.sender),
                    contains_pattern(&filter.recipients),
                    contains_pattern(&filter.subject),
                    contains_pattern(&filter.content),
                ],
                MessageSummary::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn message(&self, id: &str) -> Result<Option<Message>> {
        let message = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![id],
                Message::from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn content(&self, id: &str) -> Result<Option<MessageContent>> {
        let content = self
            .conn
            .query_row(
                "SELECT rich_content, content FROM messages WHERE message_id = ?1",
                params![id],
                |row| {
                    Ok(MessageContent {
                        rich_content: row.get(0)?,
                        content: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(content)
    }

    fn attachment_names(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT attachment_id FROM attachments WHERE message_id = ?1 ORDER BY rowid",
        )?;
        let names = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn attachment_data(&self, id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM attachments WHERE message_id = ?1 AND attachment_id = ?2
                 ORDER BY rowid LIMIT 1",
                params![id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(
            "SELECT thread_id, conversation_id, date, participants, content
             FROM conversations ORDER BY thread_id, conversation_id",
        )?;
        let rows = stmt
            .query_map([], Conversation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn group_conversations(&mut self, self_address: Option<&str>) -> Result<usize> {
        let fragments = self.conversations()?;
        let messages = reconcile::group_conversations(&fragments, self_address);

        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM messages WHERE is_conversation <> 0", [])?;
        for message in &messages {
            insert_message_row(&tx, message)?;
        }
        tx.commit()?;

        info!(
            fragments = fragments.len(),
            removed,
            written = messages.len(),
            "Regrouped chat conversations"
        );
        Ok(messages.len())
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        if self.path.as_deref().is_some_and(|own| same_file(own, path)) {
            return Err(ArchiveError::InvalidPath(format!(
                "cannot save the store onto itself: {}",
                path.display()
            )));
        }
        let mut dest = Connection::open(path)?;
        let backup = Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(PAGES_PER_STEP, PAUSE_BETWEEN_STEPS, None)?;
        info!(path = %path.display(), "Saved archive snapshot");
        Ok(())
    }

    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(ArchiveError::FileNotFound(path.to_path_buf()));
        }
        let src = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        {
            let backup = Backup::new(&src, &mut self.conn)?;
            backup.run_to_completion(PAGES_PER_STEP, PAUSE_BETWEEN_STEPS, None)?;
        }
        schema::migrate(&self.conn)?;
        info!(path = %path.display(), "Loaded archive snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, date: &str, category: &str) -> Message {
        Message {
            id: id.into(),
            sender: "jane@x.com".into(),
            recipients: "john@y.org".into(),
            subject: format!("Subject {id}"),
            date: date.into(),
            content: format!("body of {id}"),
            category: category.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_category_filter_trims() {
        assert_eq!(category_filter(&Some("/A/".into())).as_deref(), Some("/A"));
        assert_eq!(category_filter(&Some("/".into())), None);
        assert_eq!(category_filter(&None), None);
    }

    #[test]
    fn test_duplicate_message_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(&message("a", "2024-01-01 00:00:00", "")).unwrap();

        let mut changed = message("a", "2025-01-01 00:00:00", "/Other");
        changed.subject = "changed".into();
        let err = store.insert_message(&changed).unwrap_err();
        assert!(err.is_duplicate());

        let stored = store.message("a").unwrap().unwrap();
        assert_eq!(stored.subject, "Subject a");
    }

    #[test]
    fn test_duplicate_conversation_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fragment = Conversation {
            thread_id: 7,
            conversation_id: 1,
            date: "2024-01-01 00:00:00".into(),
            participants: "a@x.com".into(),
            content: "<p>hi</p>".into(),
        };
        store.insert_conversation(&fragment).unwrap();
        assert!(store.insert_conversation(&fragment).unwrap_err().is_duplicate());
        assert_eq!(store.conversation_ids().unwrap(), HashSet::from([(7, 1)]));
    }

    #[test]
    fn test_messages_sorted_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(&message("old", "2023-01-01 00:00:00", "")).unwrap();
        store.insert_message(&message("new", "2024-06-01 00:00:00", "")).unwrap();
        store.insert_message(&message("mid", "2024-01-01 00:00:00", "")).unwrap();

        let ids: Vec<String> = store
            .messages(&MessageFilter::default())
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sale = message("sale", "2024-01-01 00:00:00", "");
        sale.subject = "50% off".into();
        store.insert_message(&sale).unwrap();
        store.insert_message(&message("other", "2024-01-02 00:00:00", "")).unwrap();

        let hits = store
            .messages(&MessageFilter::default().subject("0%"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "sale");

        let none = store
            .messages(&MessageFilter::default().subject("_"))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_filters_are_case_insensitive() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(&message("a", "2024-01-01 00:00:00", "")).unwrap();
        let filter = MessageFilter::default()
            .sender("JANE@")
            .recipients("John")
            .content("BODY OF");
        assert_eq!(store.messages(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_mail_stores_message_and_attachments() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut mail = message("m", "2024-01-01 00:00:00", "");
        mail.has_attachments = 1;
        let attachment = Attachment {
            message_id: "m".into(),
            attachment_id: "a.txt".into(),
            data: b"data".to_vec(),
        };
        store.insert_mail(&mail, &[attachment]).unwrap();
        assert_eq!(store.attachment_names("m").unwrap(), vec!["a.txt"]);
        assert!(store.insert_mail(&mail, &[]).unwrap_err().is_duplicate());
    }

    #[test]
    fn test_insert_mail_rolls_back_on_attachment_failure() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_attachments BEFORE INSERT ON attachments
                 BEGIN SELECT RAISE(ABORT, 'attachment rejected'); END;",
            )
            .unwrap();

        let mut mail = message("m", "2024-01-01 00:00:00", "");
        mail.has_attachments = 1;
        let attachment = Attachment {
            message_id: "m".into(),
            attachment_id: "a.txt".into(),
            data: b"data".to_vec(),
        };
        let err = store.insert_mail(&mail, &[attachment]).unwrap_err();
        assert!(matches!(err, ArchiveError::Storage(_)));
        assert!(store.message("m").unwrap().is_none());
        assert!(store.message_ids().unwrap().is_empty());
    }

    #[test]
    fn test_same_file_resolves_dot_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        std::fs::write(&path, b"").unwrap();
        assert!(same_file(&path, &dir.path().join(".").join("archive.db")));
        assert!(!same_file(&path, &dir.path().join("other.db")));
    }
}
