//! Persistence: the `MailStore` contract and its SQLite implementation.

pub mod schema;
pub mod sqlite;

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::Result;
use crate::model::attachment::Attachment;
use crate::model::conversation::Conversation;
use crate::model::mail::{Message, MessageContent, MessageSummary};

pub use sqlite::SqliteStore;

/// Listing filter. Every set field must match; `None` fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Category path. Matches the category itself and every descendant.
    pub category: Option<String>,
    /// Case-insensitive substring of the sender list.
    pub sender: Option<String>,
    /// Case-insensitive substring of the recipient list.
    pub recipients: Option<String>,
    /// Case-insensitive substring of the subject.
    pub subject: Option<String>,
    /// Case-insensitive substring of the plain-text body.
    pub content: Option<String>,
}

impl MessageFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn recipients(mut self, recipients: impl Into<String>) -> Self {
        self.recipients = Some(recipients.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Storage sink for archived mail.
///
/// Inserts never overwrite: an existing primary key yields
/// [`ArchiveError::DuplicateKey`](crate::error::ArchiveError::DuplicateKey).
pub trait MailStore {
    fn insert_message(&self, message: &Message) -> Result<()>;

    fn insert_attachment(&self, attachment: &Attachment) -> Result<()>;

    /// Insert a message and its attachments as one unit.
    ///
    /// On any error nothing of the record is kept.
    fn insert_mail(&mut self, message: &Message, attachments: &[Attachment]) -> Result<()>;

    fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Identifiers of every stored message, used to seed deduplication.
    fn message_ids(&self) -> Result<HashSet<String>>;

    /// `(thread_id, conversation_id)` of every stored chat fragment.
    fn conversation_ids(&self) -> Result<HashSet<(i64, i64)>>;

    /// Distinct category paths.
    fn categories(&self) -> Result<BTreeSet<String>>;

    /// Matching messages, newest first.
    fn messages(&self, filter: &MessageFilter) -> Result<Vec<MessageSummary>>;

    /// One full message row.
    fn message(&self, id: &str) -> Result<Option<Message>>;

    fn content(&self, id: &str) -> Result<Option<MessageContent>>;

    /// Attachment names of a message in insertion order. Names may repeat.
    fn attachment_names(&self, id: &str) -> Result<Vec<String>>;

    /// Payload of the first attachment with this name.
    fn attachment_data(&self, id: &str, name: &str) -> Result<Option<Vec<u8>>>;

    /// Every stored chat fragment ordered by thread, then conversation id.
    fn conversations(&self) -> Result<Vec<Conversation>>;

    /// Replace all conversation messages with freshly reconciled ones.
    ///
    /// Returns the number of conversation messages written.
    fn group_conversations(&mut self, self_address: Option<&str>) -> Result<usize>;

    /// Write a full snapshot of the store to `path`.
    fn save_to_file(&self, path: &Path) -> Result<()>;

    /// Replace the store contents with the snapshot at `path`.
    fn load_from_file(&mut self, path: &Path) -> Result<()>;
}
