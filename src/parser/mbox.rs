//! MBOX archives: a streaming record splitter and the Gmail-aware adapter
//! built on top of it.
//!
//! The splitter reads line-by-line through a 1 MB buffer and never loads the
//! entire file into memory. It is tolerant of malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};
use crate::identity;
use crate::model::address::extract_addresses;
use crate::model::conversation::Conversation;
use crate::parser::header::{normalize_date, RawHeaders};
use crate::parser::mime;
use crate::parser::{
    DecodedMail, FormatAdapter, MessageSource, ParsedFile, Record, Rejected, SourceType,
};
use crate::reconcile;

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Gmail label marking a chat fragment.
const CHAT_LABEL: &str = "Chat";

/// Gmail label marking something the account owner sent.
const SENT_LABEL: &str = "Sent";

/// Streaming MBOX record splitter.
///
/// Reads through the file sequentially, invoking a caller-supplied callback for
/// every message boundary it finds. The reader is tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the file
pub struct MboxReader {
    path: PathBuf,
    file_size: u64,
    max_message_size: usize,
}

impl MboxReader {
    /// Create a reader for the given MBOX file.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// that it is actually an MBOX.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| ArchiveError::io(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Records larger than this are truncated (the remainder is skipped).
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Split the archive, calling `record_callback` for each record found.
    ///
    /// The callback receives `(offset, raw_bytes)` where `raw_bytes` starts
    /// with the `From ` envelope line, and returns `true` to continue or
    /// `false` to stop early.
    ///
    /// Returns the number of records delivered.
    pub fn read(&self, record_callback: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut current_offset: u64 = 0;
        let mut record_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut record_start: u64 = 0;
        let mut prev_line_was_empty = true;
        let mut first_line = true;
        let mut truncated = false;

        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            line_buf.clear();
            let line_len = {
                let buf = reader
                    .fill_buf()
                    .map_err(|e| ArchiveError::io(&self.path, e))?;
                if buf.is_empty() {
                    break;
                }
                let consume_len = match memchr_newline(buf) {
                    Some(pos) => pos + 1,
                    None => buf.len(),
                };
                line_buf.extend_from_slice(&buf[..consume_len]);
                reader.consume(consume_len);
                consume_len as u64
            };

            if is_mbox_separator(&line_buf) {
                if !first_line && !prev_line_was_empty {
                    warn!(
                        path = %self.path.display(),
                        offset = current_offset,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                if !record_buf.is_empty() {
                    if !record_callback(record_start, &record_buf) {
                        return Ok(count);
                    }
                    count += 1;
                }
                record_start = current_offset;
                record_buf.clear();
                record_buf.extend_from_slice(&line_buf);
                truncated = false;
            } else if truncated {
                // Rest of an oversize record is dropped.
            } else if record_buf.len() + line_buf.len() <= self.max_message_size {
                record_buf.extend_from_slice(&line_buf);
            } else {
                warn!(
                    path = %self.path.display(),
                    offset = record_start,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
                truncated = true;
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            first_line = false;
            current_offset += line_len;
        }

        if !record_buf.is_empty() && record_callback(record_start, &record_buf) {
            count += 1;
        }

        Ok(count)
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    strip_bom(line).starts_with(b"From ")
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Split a raw record into its envelope (text after `From `) and the message.
///
/// Records that do not start with a separator (leading garbage before the
/// first `From ` line) have no envelope.
fn split_envelope(raw: &[u8]) -> (Option<String>, &[u8]) {
    let raw = strip_bom(raw);
    let Some(rest) = raw.strip_prefix(b"From ") else {
        return (None, raw);
    };
    let end = memchr_newline(rest).map_or(rest.len(), |p| p + 1);
    let envelope = String::from_utf8_lossy(&rest[..end]).trim().to_string();
    (Some(envelope), &rest[end..])
}

/// Canonical field set hashed into an MBOX record identifier.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    envelope_id: &'a str,
    sender: &'a str,
    receivers: &'a str,
    subject: &'a str,
    date: &'a str,
    labels: &'a [String],
    thread_id: Option<&'a str>,
    plain: &'a str,
    html: &'a str,
    attachments: Vec<(&'a str, &'a [u8])>,
}

/// One decoded MBOX record.
#[derive(Debug, Clone)]
pub struct MboxMessage {
    id: String,
    envelope_id: String,
    mail: DecodedMail,
    labels: Vec<String>,
    thread_id: Option<String>,
}

super::impl_message_source!(MboxMessage);

impl MboxMessage {
    /// Decode one raw record as delivered by [`MboxReader::read`].
    pub fn parse(raw: &[u8], location: &str) -> Result<Self> {
        let (envelope, message) = split_envelope(raw);
        let headers = RawHeaders::from_message(message);
        if headers.is_empty() {
            return Err(ArchiveError::parse(location, "no header block"));
        }

        let envelope = envelope.unwrap_or_default();
        let envelope_id = envelope
            .split_once('@')
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        let envelope_date = envelope.split_once(' ').map(|(_, date)| date.trim());

        let date = envelope_date
            .and_then(normalize_date)
            .or_else(|| headers.get("date").and_then(normalize_date))
            .ok_or_else(|| ArchiveError::parse(location, "no parseable envelope or Date header"))?;

        let msg = mime::parse_mime(message)
            .ok_or_else(|| ArchiveError::parse(location, "not a MIME message"))?;

        let mail = DecodedMail {
            sender: headers.get("from").unwrap_or_default().to_string(),
            receivers: headers.get("to").unwrap_or_default().to_string(),
            subject: headers.get_decoded("subject"),
            date,
            bodies: mime::walk_bodies(&msg),
            attachments: mime::named_attachments(&msg),
        };
        let labels = headers.gmail_labels();
        let thread_id = headers.get("x-gm-thrid").map(|t| t.trim().to_string());

        let id = identity::record_id(&CanonicalRecord {
            envelope_id: &envelope_id,
            sender: &mail.sender,
            receivers: &mail.receivers,
            subject: &mail.subject,
            date: &mail.date,
            labels: &labels,
            thread_id: thread_id.as_deref(),
            plain: &mail.bodies.plain,
            html: &mail.bodies.html,
            attachments: mail
                .attachments
                .iter()
                .map(|a| (a.name.as_str(), a.data.as_slice()))
                .collect(),
        })?;

        Ok(Self {
            id,
            envelope_id,
            mail,
            labels,
            thread_id,
        })
    }

    /// Provisional identifier from the envelope line (text before `@`).
    pub fn envelope_id(&self) -> &str {
        &self.envelope_id
    }

    /// `X-GM-THRID` value, if present.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn is_chat(&self) -> bool {
        self.has_label(CHAT_LABEL)
    }

    pub fn is_sent(&self) -> bool {
        self.has_label(SENT_LABEL)
    }

    fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Build the chat fragment for a `Chat`-labelled record.
    ///
    /// Thread and conversation ids must be numeric.
    pub fn to_conversation(&self, location: &str) -> Result<Conversation> {
        let thread_id = self
            .thread_id()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| ArchiveError::parse(location, "chat record without numeric X-GM-THRID"))?;
        let conversation_id = self
            .envelope_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ArchiveError::parse(location, "chat record without numeric envelope id"))?;

        let senders = extract_addresses(self.sender());
        let receivers = extract_addresses(self.receivers());
        let (participants, display_sender) =
            reconcile::fragment_participants(&senders, &receivers, self.is_sent());

        let content = reconcile::fragment_content(
            thread_id,
            conversation_id,
            self.date(),
            &display_sender,
            self.payload_html(),
            self.payload_plain(),
        );

        Ok(Conversation {
            thread_id,
            conversation_id,
            date: self.date().to_string(),
            participants,
            content,
        })
    }
}

/// Category shared by every message of one archive: `/MailBox/<file stem>`.
pub fn archive_category(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("/MailBox/{stem}")
}

/// Adapter for MBOX archives, including Gmail Takeout exports.
#[derive(Debug, Clone, Copy)]
pub struct MboxAdapter {
    max_message_size: usize,
}

impl Default for MboxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MboxAdapter {
    pub fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

impl FormatAdapter for MboxAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Mbox
    }

    fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let reader = MboxReader::new(path)?.with_max_message_size(self.max_message_size);
        let category = archive_category(path);
        let mut parsed = ParsedFile::default();

        let count = reader.read(&mut |offset, raw| {
            let location = format!("{}@{offset}", path.display());
            let record = MboxMessage::parse(raw, &location).and_then(|message| {
                if message.is_chat() {
                    message.to_conversation(&location).map(Record::Conversation)
                } else {
                    let (message, attachments) = message.normalize(&category);
                    Ok(Record::Mail {
                        message,
                        attachments,
                    })
                }
            });
            match record {
                Ok(record) => parsed.records.push(record),
                Err(error) => {
                    warn!(location = %location, error = %error, "Skipping MBOX record");
                    parsed.rejected.push(Rejected { location, error });
                }
            }
            true
        })?;

        debug!(
            path = %path.display(),
            records = count,
            rejected = parsed.rejected.len(),
            "Parsed MBOX archive"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(
            b"From user@example.com Thu Jan 01 00:00:00 2024\n"
        ));
        assert!(!is_mbox_separator(b"from user@example.com\n"));
        assert!(!is_mbox_separator(b">From user@example.com\n"));
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_mbox_separator_with_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&line));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"  \n"));
        assert!(!is_blank_line(b"hello\n"));
    }

    #[test]
    fn test_split_envelope() {
        let (envelope, rest) =
            split_envelope(b"From 123@xxx Thu Jan 01 00:00:00 2024\r\nSubject: Hi\r\n\r\n");
        assert_eq!(envelope.as_deref(), Some("123@xxx Thu Jan 01 00:00:00 2024"));
        assert!(rest.starts_with(b"Subject: Hi"));

        let (envelope, rest) = split_envelope(b"Subject: Hi\n\n");
        assert!(envelope.is_none());
        assert!(rest.starts_with(b"Subject"));
    }

    #[test]
    fn test_archive_category() {
        assert_eq!(archive_category(Path::new("/x/Inbox.mbox")), "/MailBox/Inbox");
        assert_eq!(
            archive_category(Path::new("All mail Including Spam.mbox")),
            "/MailBox/All mail Including Spam"
        );
    }

    #[test]
    fn test_reader_splits_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mbox");
        std::fs::write(
            &path,
            b"From a@x Mon Jan 01 00:00:00 2024\nSubject: one\n\nbody\n\n\
From b@x Mon Jan 01 00:00:00 2024\nSubject: two\n\nbody\n\
From c@x Mon Jan 01 00:00:00 2024\nSubject: three\n\ntruncated",
        )
        .unwrap();

        let mut offsets = Vec::new();
        let count = MboxReader::new(&path)
            .unwrap()
            .read(&mut |offset, raw| {
                assert!(raw.starts_with(b"From "));
                offsets.push(offset);
                true
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(offsets[0], 0);
    }

    #[test]
    fn test_reader_truncates_oversize_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mbox");
        let mut data = b"From a@x Mon Jan 01 00:00:00 2024\nSubject: big\n\n".to_vec();
        for _ in 0..100 {
            data.extend_from_slice(b"0123456789012345678901234567890123456789\n");
        }
        std::fs::write(&path, &data).unwrap();

        let mut sizes = Vec::new();
        MboxReader::new(&path)
            .unwrap()
            .with_max_message_size(256)
            .read(&mut |_, raw| {
                sizes.push(raw.len());
                true
            })
            .unwrap();
        assert_eq!(sizes.len(), 1);
        assert!(sizes[0] <= 256);
    }

    #[test]
    fn test_reader_missing_file() {
        assert!(matches!(
            MboxReader::new("/definitely/not/here.mbox"),
            Err(ArchiveError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_envelope_date_preferred() {
        let raw = b"From 42@xxx Tue Feb 13 08:00:00 +0000 2024\n\
Date: Mon, 01 Jan 2024 00:00:00 +0000\n\
Subject: Hi\n\nbody\n";
        let message = MboxMessage::parse(raw, "t@0").unwrap();
        assert_eq!(message.date(), "2024-02-13 08:00:00");
        assert_eq!(message.envelope_id(), "42");
    }

    #[test]
    fn test_date_header_fallback_and_missing() {
        let raw = b"From nobody\nDate: Mon, 01 Jan 2024 00:00:00 +0000\n\nbody\n";
        let message = MboxMessage::parse(raw, "t@0").unwrap();
        assert_eq!(message.date(), "2024-01-01 00:00:00");

        let err = MboxMessage::parse(b"From nobody\nSubject: x\n\nbody\n", "t@0").unwrap_err();
        assert!(matches!(err, ArchiveError::ParseError { .. }));
    }

    #[test]
    fn test_record_id_depends_on_content() {
        let a = MboxMessage::parse(
            b"From 1@xxx Mon Jan 01 00:00:00 2024\nSubject: a\n\nbody\n",
            "t@0",
        )
        .unwrap();
        let b = MboxMessage::parse(
            b"From 1@xxx Mon Jan 01 00:00:00 2024\nSubject: b\n\nbody\n",
            "t@0",
        )
        .unwrap();
        let a_again = MboxMessage::parse(
            b"From 1@xxx Mon Jan 01 00:00:00 2024\nSubject: a\n\nbody\n",
            "t@99",
        )
        .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a_again.id());
        assert_eq!(a.id().len(), 64);
    }

    #[test]
    fn test_chat_record_with_non_numeric_thread_is_rejected() {
        let raw = b"From 1@xxx Mon Jan 01 00:00:00 2024\n\
X-GM-THRID: abc\n\
X-Gmail-Labels: Chat\n\nhi\n";
        let message = MboxMessage::parse(raw, "t@0").unwrap();
        assert!(message.is_chat());
        assert!(matches!(
            message.to_conversation("t@0"),
            Err(ArchiveError::ParseError { .. })
        ));
    }

    #[test]
    fn test_sent_chat_without_addresses_uses_me() {
        let raw = b"From 2@xxx Mon Jan 01 00:05:00 2024\n\
X-GM-THRID: 7\n\
X-Gmail-Labels: Chat,Sent\n\nsee you\n";
        let conversation = MboxMessage::parse(raw, "t@0")
            .unwrap()
            .to_conversation("t@0")
            .unwrap();
        assert_eq!(conversation.key(), (7, 2));
        assert_eq!(conversation.participants, reconcile::PLACEHOLDER_SELF);
        assert!(conversation.content.contains("see you"));
    }
}
