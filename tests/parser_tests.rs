//! Integration tests for the EML and MBOX adapters and header decoding.

use std::path::Path;

use candycane::model::attachment::Attachment;
use candycane::model::conversation::Conversation;
use candycane::model::mail::Message;
use candycane::parser::eml::{EmlAdapter, EmlMessage};
use candycane::parser::header::{decode_encoded_words, parse_date};
use candycane::parser::mbox::{MboxAdapter, MboxMessage, MboxReader};
use candycane::parser::{FormatAdapter, MessageSource, Record};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn mails(records: &[Record]) -> Vec<(&Message, &Vec<Attachment>)> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::Mail {
                message,
                attachments,
            } => Some((message, attachments)),
            Record::Conversation(_) => None,
        })
        .collect()
}

fn conversations(records: &[Record]) -> Vec<&Conversation> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::Conversation(c) => Some(c),
            Record::Mail { .. } => None,
        })
        .collect()
}

// ─── Test 1: simple.mbox → exactly 4 records ───────────────────────

#[test]
fn test_read_simple_mbox_count() {
    let reader = MboxReader::new(fixture("simple.mbox")).unwrap();
    let mut offsets = Vec::new();
    let count = reader
        .read(&mut |offset, _bytes| {
            offsets.push(offset);
            true
        })
        .unwrap();
    assert_eq!(count, 4, "simple.mbox should contain exactly 4 records");
    assert_eq!(offsets[0], 0);
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
}

// ─── Test 2: Reader stops when the callback says so ────────────────

#[test]
fn test_read_stops_early() {
    let reader = MboxReader::new(fixture("simple.mbox")).unwrap();
    let count = reader.read(&mut |_offset, _bytes| false).unwrap();
    assert_eq!(count, 0);
}

// ─── Test 3: >From lines stay inside their record ──────────────────

#[test]
fn test_escaped_from_is_not_a_separator() {
    let reader = MboxReader::new(fixture("simple.mbox")).unwrap();
    let mut second = Vec::new();
    let mut index = 0;
    reader
        .read(&mut |_offset, bytes| {
            if index == 1 {
                second = bytes.to_vec();
            }
            index += 1;
            true
        })
        .unwrap();
    let text = String::from_utf8(second).unwrap();
    assert!(text.contains(">From the archives"));
}

// ─── Test 4: Encoded words in From and Subject ─────────────────────

#[test]
fn test_mbox_encoded_headers() {
    let parsed = MboxAdapter::new()
        .parse_file(&fixture("simple.mbox"))
        .unwrap();
    assert!(parsed.rejected.is_empty(), "{:?}", parsed.rejected);
    let mails = mails(&parsed.records);
    assert_eq!(mails.len(), 4);

    let (third, _) = mails[2];
    assert_eq!(third.subject, "Café con leña");
    assert_eq!(third.sender, "jose@example.es");
    assert_eq!(third.date, "2024-01-16 09:00:00");
    assert_eq!(third.category, "/MailBox/simple");
}

// ─── Test 5: Last record without trailing newline ──────────────────

#[test]
fn test_mbox_last_record_without_newline() {
    let parsed = MboxAdapter::new()
        .parse_file(&fixture("simple.mbox"))
        .unwrap();
    let mails = mails(&parsed.records);
    let (last, _) = mails[3];
    assert_eq!(last.subject, "No blank line before me");
    assert!(last.content.contains("truncated without trailing newline"));
}

// ─── Test 6: Multipart EML with sidecar ────────────────────────────

#[test]
fn test_eml_multipart_fields() {
    let message = EmlMessage::from_file(fixture("eml_folder/multipart.eml")).unwrap();
    assert_eq!(message.sender(), "Jane Doe <jane@x.com>");
    assert_eq!(message.subject(), "Quarterly report ✓");
    assert_eq!(message.date(), "2024-03-05 13:20:00");
    assert_eq!(message.payload_plain().trim(), "hello");
    assert_eq!(message.payload_html().trim(), "<p>hi</p>");
    assert_eq!(message.attachment_names(), vec!["a.txt"]);
    assert_eq!(message.attachment_data("a.txt"), Some(&b"data"[..]));
    assert_eq!(message.category(), "/Work/Reports");
}

// ─── Test 7: Normalized EML row ────────────────────────────────────

#[test]
fn test_eml_adapter_normalizes_addresses() {
    let parsed = EmlAdapter
        .parse_file(&fixture("eml_folder/multipart.eml"))
        .unwrap();
    let mails = mails(&parsed.records);
    assert_eq!(mails.len(), 1);
    let (message, attachments) = mails[0];
    assert_eq!(message.sender, "jane@x.com");
    assert_eq!(message.recipients, "john@y.org,bob@z.net");
    assert_eq!(message.has_attachments, 1);
    assert_eq!(message.id.len(), 64);
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].message_id, message.id);
    assert_eq!(attachments[0].attachment_id, "a.txt");
}

// ─── Test 8: EML without a sidecar lands in the root ───────────────

#[test]
fn test_eml_without_sidecar_has_root_category() {
    let message = EmlMessage::from_file(fixture("eml_folder/nested/latin1.eml")).unwrap();
    assert_eq!(message.category(), "");
    assert_eq!(message.subject(), "Café con leña");
    assert!(message.payload_html().is_empty());
}

// ─── Test 9: Undeclared 8-bit bodies fall back to Latin-1 ──────────

#[test]
fn test_latin1_bodies_in_both_formats() {
    let eml = b"From: a@b.com\n\
Date: Mon, 15 Jan 2024 10:30:00 +0000\n\
Content-Type: text/plain; charset=utf-8\n\
\n\
caf\xe9\n";
    let message = EmlMessage::from_bytes(eml, "latin1.eml").unwrap();
    assert_eq!(message.payload_plain().trim_end(), "café");

    let record = b"From 1@xxx Mon Jan 15 10:30:00 2024\n\
From: a@b.com\n\
Subject: accents\n\
\n\
caf\xe9\n";
    let message = MboxMessage::parse(record, "inline@0").unwrap();
    assert_eq!(message.payload_plain().trim_end(), "café");
}

// ─── Test 10: Corrupt EML is a parse error ─────────────────────────

#[test]
fn test_corrupt_eml_is_rejected() {
    let err = EmlAdapter.parse_file(&fixture("corrupt.eml")).unwrap_err();
    assert!(err.to_string().contains("corrupt.eml"), "{err}");
}

// ─── Test 11: Gmail export splits mail and chat ────────────────────

#[test]
fn test_gmail_mbox_records() {
    let parsed = MboxAdapter::new()
        .parse_file(&fixture("mbox_folder/gmail.mbox"))
        .unwrap();

    let mails = mails(&parsed.records);
    assert_eq!(mails.len(), 1);
    let (invoice, attachments) = mails[0];
    assert_eq!(invoice.subject, "Invoice");
    assert_eq!(invoice.category, "/MailBox/gmail");
    assert_eq!(invoice.date, "2024-03-05 09:00:00");
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].attachment_id, "report.pdf");
    assert_eq!(attachments[0].data, b"%PDF-1.4\n");

    let chats = conversations(&parsed.records);
    assert_eq!(chats.len(), 2);
    assert!(chats.iter().all(|c| c.thread_id == 7));
    assert_eq!(chats[0].conversation_id, 1);
    assert_eq!(chats[0].participants, "carol@x.com,me@example.com");
    assert_eq!(chats[1].participants, "me");
    assert!(chats[1].content.contains("yes, just got back"));

    assert_eq!(parsed.rejected.len(), 1);
    assert!(parsed.rejected[0].location.contains("gmail.mbox@"));
}

// ─── Test 12: Labels and thread id ─────────────────────────────────

#[test]
fn test_mbox_message_labels() {
    let reader = MboxReader::new(fixture("mbox_folder/gmail.mbox")).unwrap();
    let mut parsed = Vec::new();
    reader
        .read(&mut |offset, bytes| {
            parsed.push(MboxMessage::parse(bytes, &offset.to_string()).unwrap());
            true
        })
        .unwrap();

    assert!(!parsed[0].is_chat() && !parsed[0].is_sent());
    assert_eq!(parsed[0].thread_id(), Some("1780000000000000001"));
    assert!(parsed[1].is_chat() && !parsed[1].is_sent());
    assert_eq!(parsed[0].envelope_id(), "1780000000000000001");
    assert!(parsed[2].is_chat() && parsed[2].is_sent());
    assert_eq!(parsed[2].thread_id(), Some("7"));
}

// ─── Test 13: Decode encoded words ─────────────────────────────────

#[test]
fn test_decode_encoded_words() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="),
        "Hola mundo"
    );
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?Caf=E9?="), "Café");
    assert_eq!(decode_encoded_words("plain subject"), "plain subject");
}

// ─── Test 14: Date parsing ─────────────────────────────────────────

#[test]
fn test_date_formats() {
    let rfc = parse_date("Mon, 15 Jan 2024 10:30:00 +0000").unwrap();
    let envelope = parse_date("Mon Jan 15 10:30:00 2024").unwrap();
    assert_eq!(rfc, envelope);
    assert!(parse_date("not a date").is_none());
}
