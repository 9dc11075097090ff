//! Email parsing: the decoded message view, the two archive format adapters
//! (EML files and MBOX archives), header decoding and MIME handling.

pub mod eml;
pub mod header;
pub mod mbox;
pub mod mime;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::ImportConfig;
use crate::error::{ArchiveError, Result};
use crate::model::address::{dedup_preserving_order, extract_addresses, join_addresses};
use crate::model::attachment::Attachment;
use crate::model::conversation::Conversation;
use crate::model::mail::Message;

use self::mime::{Bodies, DecodedAttachment};

/// Uniform decoded view of one physical e-mail unit.
///
/// Implemented by each format's message type; [`MessageSource::normalize`]
/// turns any of them into storable rows.
pub trait MessageSource {
    /// Content-derived identifier.
    fn id(&self) -> &str;

    /// Raw `From` header text, before address extraction.
    fn sender(&self) -> &str;

    /// Raw `To` header text, before address extraction.
    fn receivers(&self) -> &str;

    /// Decoded subject line.
    fn subject(&self) -> &str;

    /// Normalized `YYYY-MM-DD HH:MM:SS` date.
    fn date(&self) -> &str;

    fn payload_plain(&self) -> &str;

    fn payload_html(&self) -> &str;

    /// Attachment display names in MIME order. Names may repeat.
    fn attachment_names(&self) -> Vec<&str>;

    /// Payload of the first attachment with the given name.
    fn attachment_data(&self, name: &str) -> Option<&[u8]>;

    /// Build the message row and its attachment rows.
    fn normalize(&self, category: &str) -> (Message, Vec<Attachment>) {
        let names = self.attachment_names();
        let attachments: Vec<Attachment> = names
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                // Same-name attachments are addressed by position, not by name.
                let data = self.attachment_data_at(index).or_else(|| self.attachment_data(name))?;
                Some(Attachment {
                    message_id: self.id().to_string(),
                    attachment_id: name.to_string(),
                    data: data.to_vec(),
                })
            })
            .collect();

        let message = Message {
            id: self.id().to_string(),
            sender: addresses_of(self.sender()),
            recipients: addresses_of(self.receivers()),
            subject: self.subject().to_string(),
            date: self.date().to_string(),
            content: self.payload_plain().to_string(),
            rich_content: self.payload_html().to_string(),
            has_attachments: attachments.len() as u32,
            category: category.to_string(),
            is_conversation: false,
        };
        (message, attachments)
    }

    /// Payload of the attachment at a position in [`attachment_names`](Self::attachment_names).
    fn attachment_data_at(&self, _index: usize) -> Option<&[u8]> {
        None
    }
}

/// Extract, deduplicate and re-join the addresses found in raw header text.
pub fn addresses_of(raw: &str) -> String {
    join_addresses(&dedup_preserving_order(extract_addresses(raw)))
}

/// Header and body fields shared by every format's decoded message.
#[derive(Debug, Clone, Default)]
pub struct DecodedMail {
    pub sender: String,
    pub receivers: String,
    pub subject: String,
    pub date: String,
    pub bodies: Bodies,
    pub attachments: Vec<DecodedAttachment>,
}

impl DecodedMail {
    fn attachment_names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.name.as_str()).collect()
    }

    fn attachment_data(&self, name: &str) -> Option<&[u8]> {
        self.attachments
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.data.as_slice())
    }

    fn attachment_data_at(&self, index: usize) -> Option<&[u8]> {
        self.attachments.get(index).map(|a| a.data.as_slice())
    }
}

/// Implement [`MessageSource`] for a type with `id: String` and
/// `mail: DecodedMail` fields.
macro_rules! impl_message_source {
    ($ty:ty) => {
        impl $crate::parser::MessageSource for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn sender(&self) -> &str {
                &self.mail.sender
            }
            fn receivers(&self) -> &str {
                &self.mail.receivers
            }
            fn subject(&self) -> &str {
                &self.mail.subject
            }
            fn date(&self) -> &str {
                &self.mail.date
            }
            fn payload_plain(&self) -> &str {
                &self.mail.bodies.plain
            }
            fn payload_html(&self) -> &str {
                &self.mail.bodies.html
            }
            fn attachment_names(&self) -> Vec<&str> {
                self.mail.attachment_names()
            }
            fn attachment_data(&self, name: &str) -> Option<&[u8]> {
                self.mail.attachment_data(name)
            }
            fn attachment_data_at(&self, index: usize) -> Option<&[u8]> {
                self.mail.attachment_data_at(index)
            }
        }
    };
}
pub(crate) use impl_message_source;

/// One storable unit produced by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Mail {
        message: Message,
        attachments: Vec<Attachment>,
    },
    Conversation(Conversation),
}

/// A record inside a readable file that could not be decoded.
#[derive(Debug)]
pub struct Rejected {
    /// `path` or `path@offset`.
    pub location: String,
    pub error: ArchiveError,
}

/// Everything an adapter extracted from one file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<Record>,
    pub rejected: Vec<Rejected>,
}

/// File-level contract implemented by each archive format.
pub trait FormatAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// File extension handled by this adapter, without the dot.
    fn extension(&self) -> &'static str {
        self.source_type().extension()
    }

    /// Parse one file.
    ///
    /// An `Err` means the file as a whole could not be read or decoded.
    /// Record-level failures inside a readable file land in
    /// [`ParsedFile::rejected`].
    fn parse_file(&self, path: &Path) -> Result<ParsedFile>;
}

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Eml,
    Mbox,
}

impl SourceType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Eml => "eml",
            Self::Mbox => "mbox",
        }
    }

    /// Adapter for this format, configured from the import settings.
    pub fn adapter(self, config: &ImportConfig) -> Box<dyn FormatAdapter> {
        match self {
            Self::Eml => Box::new(eml::EmlAdapter),
            Self::Mbox => {
                Box::new(mbox::MboxAdapter::new().with_max_message_size(config.max_message_size))
            }
        }
    }

    /// `true` if `path` has this format's extension (case-insensitive).
    pub fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.extension()))
    }
}

impl FromStr for SourceType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eml" => Ok(Self::Eml),
            "mbox" => Ok(Self::Mbox),
            other => Err(ArchiveError::UnknownSourceType(other.to_string())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
