//! Parser for individual `.eml` files (RFC 5322 messages without MBOX framing),
//! with optional `<file>.meta` JSON sidecars supplying a category path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};
use crate::identity;
use crate::parser::header::{normalize_date, RawHeaders};
use crate::parser::mime;
use crate::parser::{DecodedMail, FormatAdapter, MessageSource, ParsedFile, Record, SourceType};

/// A decoded `.eml` file.
#[derive(Debug, Clone)]
pub struct EmlMessage {
    id: String,
    mail: DecodedMail,
    category: String,
}

super::impl_message_source!(EmlMessage);

impl EmlMessage {
    /// Decode a whole EML file held in memory.
    ///
    /// `location` names the source in error messages. The category is left
    /// empty; [`EmlMessage::from_file`] fills it from the sidecar.
    pub fn from_bytes(data: &[u8], location: &str) -> Result<Self> {
        let headers = RawHeaders::from_message(data);
        if headers.is_empty() {
            return Err(ArchiveError::parse(location, "no header block"));
        }

        let date = headers
            .get("date")
            .and_then(normalize_date)
            .ok_or_else(|| ArchiveError::parse(location, "missing or unparseable Date header"))?;

        let msg = mime::parse_mime(data)
            .ok_or_else(|| ArchiveError::parse(location, "not a MIME message"))?;

        let mail = DecodedMail {
            sender: headers.get("from").unwrap_or_default().to_string(),
            receivers: headers.get("to").unwrap_or_default().to_string(),
            subject: headers.get_decoded("subject"),
            date,
            bodies: mime::canonical_bodies(&msg),
            attachments: mime::disposition_attachments(&msg),
        };

        Ok(Self {
            id: identity::content_id(data),
            mail,
            category: String::new(),
        })
    }

    /// Read and decode an EML file and its sidecar.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ArchiveError::io(path, e))?;
        let mut message = Self::from_bytes(&data, &path.display().to_string())?;
        message.category = read_sidecar_category(path);
        Ok(message)
    }

    /// Category path supplied by the sidecar; empty for the root.
    pub fn category(&self) -> &str {
        &self.category
    }
}

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    #[serde(rename = "Path", default)]
    path: Option<String>,
}

/// Location of the sidecar for an EML file: the full file name plus `.meta`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".meta");
    PathBuf::from(name)
}

/// Category from the `"Path"` key of the sidecar.
///
/// A missing sidecar, a missing key or malformed JSON all yield the root
/// category; malformed JSON is logged.
pub fn read_sidecar_category(path: &Path) -> String {
    let meta = sidecar_path(path);
    let bytes = match std::fs::read(&meta) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return String::new(),
        Err(e) => {
            warn!(path = %meta.display(), error = %e, "Cannot read sidecar metadata");
            return String::new();
        }
    };

    match serde_json::from_slice::<Sidecar>(&bytes) {
        Ok(sidecar) => sidecar.path.unwrap_or_default(),
        Err(e) => {
            warn!(path = %meta.display(), error = %e, "Malformed sidecar metadata, using root category");
            String::new()
        }
    }
}

/// Adapter for folders of `.eml` files: one message per file.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmlAdapter;

impl FormatAdapter for EmlAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Eml
    }

    fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let message = EmlMessage::from_file(path)?;
        debug!(path = %path.display(), id = message.id(), "Parsed EML file");

        let (message, attachments) = message.normalize(message.category());
        Ok(ParsedFile {
            records: vec![Record::Mail {
                message,
                attachments,
            }],
            rejected: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"From: Jane Doe <jane@x.com>\r\n\
To: john@y.org\r\n\
Subject: =?UTF-8?Q?caf=C3=A9?=\r\n\
Date: Mon, 15 Jan 2024 10:30:00 +0100\r\n\
\r\n\
Body\r\n";

    #[test]
    fn test_from_bytes_decodes_headers() {
        let message = EmlMessage::from_bytes(SIMPLE, "simple.eml").unwrap();
        assert_eq!(message.subject(), "café");
        assert_eq!(message.date(), "2024-01-15 09:30:00");
        assert_eq!(message.sender(), "Jane Doe <jane@x.com>");
        assert_eq!(message.payload_plain().trim_end(), "Body");
        assert_eq!(message.payload_html(), "");
        assert_eq!(message.id(), identity::content_id(SIMPLE));
    }

    #[test]
    fn test_missing_date_is_parse_error() {
        let err = EmlMessage::from_bytes(b"From: a@b.com\n\nBody\n", "x.eml").unwrap_err();
        assert!(matches!(err, ArchiveError::ParseError { .. }));
    }

    #[test]
    fn test_no_headers_is_parse_error() {
        let err = EmlMessage::from_bytes(b"just some text\nwithout headers\n", "x.eml").unwrap_err();
        assert!(matches!(err, ArchiveError::ParseError { .. }));
    }

    #[test]
    fn test_sidecar_path_appends_meta() {
        assert_eq!(
            sidecar_path(Path::new("/a/b/mail.eml")),
            PathBuf::from("/a/b/mail.eml.meta")
        );
    }

    #[test]
    fn test_sidecar_category() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("m.eml");
        std::fs::write(&eml, SIMPLE).unwrap();

        assert_eq!(read_sidecar_category(&eml), "");

        std::fs::write(sidecar_path(&eml), r#"{"Path": "/Work/Projects"}"#).unwrap();
        assert_eq!(read_sidecar_category(&eml), "/Work/Projects");

        std::fs::write(sidecar_path(&eml), r#"{"Other": 1}"#).unwrap();
        assert_eq!(read_sidecar_category(&eml), "");

        std::fs::write(sidecar_path(&eml), "{not json").unwrap();
        assert_eq!(read_sidecar_category(&eml), "");
    }

    #[test]
    fn test_adapter_yields_one_mail_record() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("m.eml");
        std::fs::write(&eml, SIMPLE).unwrap();
        std::fs::write(sidecar_path(&eml), r#"{"Path": "/Inbox"}"#).unwrap();

        let parsed = EmlAdapter.parse_file(&eml).unwrap();
        assert!(parsed.rejected.is_empty());
        match &parsed.records[..] {
            [Record::Mail { message, attachments }] => {
                assert_eq!(message.category, "/Inbox");
                assert_eq!(message.sender, "jane@x.com");
                assert_eq!(message.recipients, "john@y.org");
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected records: {other:?}"),
        }
    }
}
