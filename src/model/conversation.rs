//! Raw Gmail chat fragments, stored before reconciliation.

/// One chat message from a Gmail `Chat`-labelled MBOX record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    /// `X-GM-THRID`: groups fragments of the same chat.
    pub thread_id: i64,

    /// Gmail message id taken from the MBOX envelope line.
    pub conversation_id: i64,

    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub date: String,

    /// Comma-joined participants, deduplicated in first-seen order.
    pub participants: String,

    /// HTML fragment shown for this chat line.
    pub content: String,
}

impl Conversation {
    /// Primary key of the fragment.
    pub fn key(&self) -> (i64, i64) {
        (self.thread_id, self.conversation_id)
    }
}

impl std::fmt::Display for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conversation[{}, {}]", self.thread_id, self.conversation_id)
    }
}
