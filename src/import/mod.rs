//! Ingestion: walk a folder, run the format adapter on every matching file,
//! deduplicate and store the records, then reconcile chat threads.

pub mod worker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::error::{ArchiveError, Result};
use crate::model::attachment::Attachment;
use crate::model::conversation::Conversation;
use crate::model::mail::Message;
use crate::parser::{FormatAdapter, Record, SourceType};
use crate::store::MailStore;

/// Shared flag asking a running import to stop after the current file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file or record that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    /// `path` or `path@offset`.
    pub location: String,
    pub reason: String,
}

impl ImportFailure {
    fn new(location: impl Into<String>, error: &ArchiveError) -> Self {
        Self {
            location: location.into(),
            reason: error.to_string(),
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Matching files found under the folder.
    pub files_seen: usize,
    pub messages_inserted: usize,
    pub attachments_inserted: usize,
    pub conversations_inserted: usize,
    /// Records whose key was already known.
    pub duplicates_skipped: usize,
    pub failures: Vec<ImportFailure>,
    /// Synthetic messages written by the reconciliation pass.
    pub conversation_messages: usize,
    /// `true` if the run stopped early; reconciliation was skipped.
    pub cancelled: bool,
}

/// Progress callback: `(files_done, files_total)`.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Drives imports into a [`MailStore`].
///
/// The importer owns the store for the duration of its life; get it back
/// with [`Importer::into_store`].
pub struct Importer<S> {
    store: S,
    config: ImportConfig,
    message_ids: HashSet<String>,
    conversation_ids: HashSet<(i64, i64)>,
}

impl<S: MailStore> Importer<S> {
    pub fn new(store: S, config: ImportConfig) -> Self {
        Self {
            store,
            config,
            message_ids: HashSet::new(),
            conversation_ids: HashSet::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Import every file of `source_type` under `folder`.
    pub fn import(&mut self, folder: &Path, source_type: SourceType) -> Result<ImportReport> {
        self.import_with(folder, source_type, &CancelToken::new(), None)
    }

    /// Import with cancellation and progress reporting.
    ///
    /// The token is checked between files. Only a missing or unreadable
    /// `folder` or a failure to seed the key sets is an `Err`; everything
    /// else lands in [`ImportReport::failures`].
    pub fn import_with(
        &mut self,
        folder: &Path,
        source_type: SourceType,
        cancel: &CancelToken,
        progress: Option<Progress<'_>>,
    ) -> Result<ImportReport> {
        if !folder.exists() {
            return Err(ArchiveError::FileNotFound(folder.to_path_buf()));
        }
        if !folder.is_dir() {
            return Err(ArchiveError::InvalidPath(format!(
                "not a directory: {}",
                folder.display()
            )));
        }

        self.message_ids = self.store.message_ids()?;
        self.conversation_ids = self.store.conversation_ids()?;

        let adapter = source_type.adapter(&self.config);
        let mut report = ImportReport::default();
        let files = self.collect_files(folder, source_type, &mut report);
        report.files_seen = files.len();
        info!(
            folder = %folder.display(),
            source_type = %source_type,
            files = files.len(),
            "Starting import"
        );

        for (done, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(files_done = done, "Import cancelled");
                report.cancelled = true;
                break;
            }
            self.import_file(adapter.as_ref(), path, &mut report);
            if let Some(cb) = progress {
                cb(done + 1, files.len());
            }
        }

        if source_type == SourceType::Mbox && !report.cancelled {
            match self.store.group_conversations(self.config.self_address.as_deref()) {
                Ok(written) => report.conversation_messages = written,
                Err(e) => {
                    warn!(error = %e, "Conversation reconciliation failed");
                    report
                        .failures
                        .push(ImportFailure::new("conversation reconciliation", &e));
                }
            }
        }

        info!(
            messages = report.messages_inserted,
            attachments = report.attachments_inserted,
            conversations = report.conversations_inserted,
            duplicates = report.duplicates_skipped,
            failures = report.failures.len(),
            "Import finished"
        );
        Ok(report)
    }

    /// Matching files under `folder`, sorted by file name at every level.
    fn collect_files(
        &self,
        folder: &Path,
        source_type: SourceType,
        report: &mut ImportReport,
    ) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let walker = WalkDir::new(folder)
            .follow_links(self.config.follow_links)
            .sort_by_file_name();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() && source_type.matches(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => {
                    let location = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| folder.display().to_string());
                    warn!(location = %location, error = %e, "Cannot walk import folder entry");
                    report.failures.push(ImportFailure {
                        location,
                        reason: e.to_string(),
                    });
                }
            }
        }
        files
    }

    fn import_file(&mut self, adapter: &dyn FormatAdapter, path: &Path, report: &mut ImportReport) {
        let parsed = match adapter.parse_file(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                report
                    .failures
                    .push(ImportFailure::new(path.display().to_string(), &e));
                return;
            }
        };

        for rejected in parsed.rejected {
            report
                .failures
                .push(ImportFailure::new(rejected.location, &rejected.error));
        }
        for record in parsed.records {
            self.store_record(record, path, report);
        }
    }

    fn store_record(&mut self, record: Record, path: &Path, report: &mut ImportReport) {
        match record {
            Record::Mail {
                message,
                attachments,
            } => self.store_mail(message, attachments, path, report),
            Record::Conversation(conversation) => {
                self.store_conversation(conversation, path, report)
            }
        }
    }

    fn store_mail(
        &mut self,
        message: Message,
        attachments: Vec<Attachment>,
        path: &Path,
        report: &mut ImportReport,
    ) {
        if self.message_ids.contains(&message.id) {
            debug!(id = %message.id, "Skipping known message");
            report.duplicates_skipped += 1;
            return;
        }

        // A failed record stays unknown so a later copy can still be stored.
        match self.store.insert_mail(&message, &attachments) {
            Ok(()) => {
                report.messages_inserted += 1;
                report.attachments_inserted += attachments.len();
                self.message_ids.insert(message.id);
            }
            Err(e) if e.is_duplicate() => {
                report.duplicates_skipped += 1;
                self.message_ids.insert(message.id);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    id = %message.id,
                    attachments = attachments.len(),
                    error = %e,
                    "Failed to store message"
                );
                report
                    .failures
                    .push(ImportFailure::new(path.display().to_string(), &e));
            }
        }
    }

    fn store_conversation(
        &mut self,
        conversation: Conversation,
        path: &Path,
        report: &mut ImportReport,
    ) {
        let key = conversation.key();
        if self.conversation_ids.contains(&key) {
            report.duplicates_skipped += 1;
            return;
        }

        match self.store.insert_conversation(&conversation) {
            Ok(()) => {
                report.conversations_inserted += 1;
                self.conversation_ids.insert(key);
            }
            Err(e) if e.is_duplicate() => {
                report.duplicates_skipped += 1;
                self.conversation_ids.insert(key);
            }
            Err(e) => {
                warn!(path = %path.display(), conversation = %conversation, error = %e, "Failed to store chat fragment");
                report
                    .failures
                    .push(ImportFailure::new(path.display().to_string(), &e));
            }
        }
    }
}
