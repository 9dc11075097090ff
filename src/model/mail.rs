//! Archived message rows and the listing views built from them.

use serde::{Deserialize, Serialize};

/// Category assigned to messages synthesized from Gmail chat threads.
pub const CONVERSATION_CATEGORY: &str = "/Conversations";

/// One normalized e-mail as stored in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Content-derived identifier (64 hex chars), or the decimal thread id
    /// for synthetic conversation messages.
    pub id: String,

    /// Comma-joined sender addresses.
    pub sender: String,

    /// Comma-joined recipient addresses.
    pub recipients: String,

    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,

    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub date: String,

    /// Plain-text body, empty if the message has none.
    pub content: String,

    /// HTML body, empty if the message has none.
    pub rich_content: String,

    /// Number of attachments stored for this message.
    pub has_attachments: u32,

    /// Slash-delimited folder path. Empty string is the root.
    pub category: String,

    /// `true` for rows produced by conversation reconciliation.
    pub is_conversation: bool,
}

/// Compact listing row returned by message queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub sender: String,
    pub recipients: String,
    pub subject: String,
    pub date: String,
    pub has_attachments: u32,
}

/// Both bodies of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub rich_content: String,
    pub content: String,
}

impl MessageContent {
    /// Preferred body for display: HTML when present, plain text otherwise.
    pub fn preferred(&self) -> &str {
        if self.rich_content.trim().is_empty() {
            &self.content
        } else {
            &self.rich_content
        }
    }
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            recipients: message.recipients.clone(),
            subject: message.subject.clone(),
            date: message.date.clone(),
            has_attachments: message.has_attachments,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message[{}] = {{{}, {}, {}}}",
            self.id, self.sender, self.recipients, self.subject
        )
    }
}
