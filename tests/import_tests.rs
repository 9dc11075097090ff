//! Integration tests for folder imports and chat reconciliation.

use std::fs;
use std::path::{Path, PathBuf};

use candycane::config::ImportConfig;
use candycane::import::worker::{spawn_import, ImportJob};
use candycane::import::Importer;
use candycane::model::mail::CONVERSATION_CATEGORY;
use candycane::parser::SourceType;
use candycane::store::{MailStore, MessageFilter, SqliteStore};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Copy fixture files (relative names) into a fresh temporary folder.
fn folder_with(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in files {
        let target = dir.path().join(Path::new(name).file_name().unwrap());
        fs::copy(fixture(name), target).unwrap();
    }
    dir
}

fn importer(self_address: Option<&str>) -> Importer<SqliteStore> {
    let config = ImportConfig {
        self_address: self_address.map(str::to_string),
        ..ImportConfig::default()
    };
    Importer::new(SqliteStore::open_in_memory().unwrap(), config)
}

// ─── Test 1: EML round trip through the store ───────────────────────

#[test]
fn test_eml_import_round_trip() {
    let mut importer = importer(None);
    let report = importer
        .import(&fixture("eml_folder"), SourceType::Eml)
        .unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.messages_inserted, 2);
    assert_eq!(report.attachments_inserted, 1);
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let store = importer.store();
    let found = store
        .messages(&MessageFilter::default().subject("Quarterly"))
        .unwrap();
    assert_eq!(found.len(), 1);
    let id = &found[0].id;

    let content = store.content(id).unwrap().unwrap();
    assert_eq!(content.content.trim(), "hello");
    assert_eq!(content.rich_content.trim(), "<p>hi</p>");
    assert_eq!(store.attachment_names(id).unwrap(), vec!["a.txt"]);
    assert_eq!(
        store.attachment_data(id, "a.txt").unwrap().as_deref(),
        Some(&b"data"[..])
    );

    let message = store.message(id).unwrap().unwrap();
    assert_eq!(message.category, "/Work/Reports");
    assert_eq!(message.sender, "jane@x.com");
    assert_eq!(message.recipients, "john@y.org,bob@z.net");
    assert_eq!(message.has_attachments, 1);
    assert!(!message.is_conversation);
}

// ─── Test 2: Importing twice adds nothing ───────────────────────────

#[test]
fn test_reimport_is_idempotent() {
    let mut importer = importer(None);
    let folder = fixture("eml_folder");
    importer.import(&folder, SourceType::Eml).unwrap();

    let mut second = Importer::new(importer.into_store(), ImportConfig::default());
    let report = second.import(&folder, SourceType::Eml).unwrap();
    assert_eq!(report.messages_inserted, 0);
    assert_eq!(report.attachments_inserted, 0);
    assert_eq!(report.duplicates_skipped, 2);
    assert_eq!(second.store().message_ids().unwrap().len(), 2);
}

// ─── Test 3: A corrupt file does not stop the import ────────────────

#[test]
fn test_corrupt_file_is_reported_and_skipped() {
    let dir = folder_with(&["corrupt.eml", "eml_folder/multipart.eml"]);
    let mut importer = importer(None);
    let report = importer.import(dir.path(), SourceType::Eml).unwrap();

    assert_eq!(report.files_seen, 2);
    assert_eq!(report.messages_inserted, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].location.ends_with("corrupt.eml"));
}

// ─── Test 4: Gmail export with chat fragments ───────────────────────

#[test]
fn test_mbox_import_groups_chat_thread() {
    let mut importer = importer(Some("me@example.com"));
    let report = importer
        .import(&fixture("mbox_folder"), SourceType::Mbox)
        .unwrap();
    assert_eq!(report.messages_inserted, 1);
    assert_eq!(report.attachments_inserted, 1);
    assert_eq!(report.conversations_inserted, 2);
    assert_eq!(report.conversation_messages, 1);
    assert_eq!(report.failures.len(), 1, "non-numeric thread is rejected");

    let store = importer.store();
    let thread = store.message("7").unwrap().unwrap();
    assert!(thread.is_conversation);
    assert_eq!(thread.category, CONVERSATION_CATEGORY);
    assert_eq!(thread.recipients, "carol@x.com,me");
    assert_eq!(thread.date, "2024-03-06 10:01:00");
    assert_eq!(thread.subject, "Conversation from 2024-03-06 10:00:00");

    // Newest fragment first.
    let newest = thread.rich_content.find("yes, just got back").unwrap();
    let oldest = thread.rich_content.find("hey, are you around?").unwrap();
    assert!(newest < oldest);

    let categories = store.categories().unwrap();
    assert!(categories.contains("/MailBox/gmail"));
    assert!(categories.contains(CONVERSATION_CATEGORY));
}

// ─── Test 5: Regrouping yields identical rows ───────────────────────

#[test]
fn test_regrouping_is_stable() {
    let mut importer = importer(Some("me@example.com"));
    importer
        .import(&fixture("mbox_folder"), SourceType::Mbox)
        .unwrap();
    let before = importer.store().message("7").unwrap().unwrap();

    let mut store = importer.into_store();
    assert_eq!(store.group_conversations(Some("me@example.com")).unwrap(), 1);
    let after = store.message("7").unwrap().unwrap();
    assert_eq!(before, after);

    let mut again = Importer::new(
        store,
        ImportConfig {
            self_address: Some("me@example.com".into()),
            ..ImportConfig::default()
        },
    );
    let report = again
        .import(&fixture("mbox_folder"), SourceType::Mbox)
        .unwrap();
    assert_eq!(report.conversations_inserted, 0);
    assert_eq!(report.messages_inserted, 0);
    assert_eq!(report.duplicates_skipped, 3);
    assert_eq!(again.store().message("7").unwrap().unwrap(), before);
}

// ─── Test 6: Background import hands the store back ─────────────────

#[test]
fn test_background_import() {
    let job = ImportJob::new(fixture("mbox_folder"), SourceType::Mbox, ImportConfig::default());
    let handle = spawn_import(SqliteStore::open_in_memory().unwrap(), job).unwrap();
    let (store, result) = handle.join().unwrap();
    let report = result.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.conversation_messages, 1);
    assert_eq!(store.conversations().unwrap().len(), 2);
}
