//! Attachment rows.
//!
//! The payload is held fully in memory; attachments are not streamed.

/// Binary payload attached to exactly one message.
///
/// `attachment_id` is the display name taken from the MIME headers and is
/// not guaranteed to be unique within a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// Identifier of the owning message.
    pub message_id: String,

    /// Display name of the attachment (usually its filename).
    pub attachment_id: String,

    /// Decoded content.
    pub data: Vec<u8>,
}

impl std::fmt::Display for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Attachment[{}] = {{{}, {} bytes}}",
            self.message_id,
            self.attachment_id,
            self.data.len()
        )
    }
}
