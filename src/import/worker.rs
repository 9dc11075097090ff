//! Background imports on a dedicated thread.
//!
//! The worker thread owns the [`Importer`] (and with it the store) for the
//! duration of the run. Callers keep a [`CancelToken`] and get the store back
//! from [`ImportHandle::join`].

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::config::ImportConfig;
use crate::error::{ArchiveError, Result};
use crate::import::{CancelToken, ImportReport, Importer};
use crate::parser::SourceType;
use crate::store::MailStore;

/// Called on the worker thread with a reference to the outcome.
pub type Completion = Box<dyn FnOnce(&Result<ImportReport>) + Send>;

/// Called on the worker thread after each file: `(files_done, files_total)`.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Handle to an import running on its own thread.
pub struct ImportHandle<S> {
    cancel: CancelToken,
    thread: JoinHandle<(S, Result<ImportReport>)>,
}

impl<S> ImportHandle<S> {
    /// Ask the import to stop after the file in progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker and take back the store with the outcome.
    ///
    /// A panic on the worker thread is reported as an error and the store is
    /// lost with it.
    pub fn join(self) -> Result<(S, Result<ImportReport>)> {
        self.thread.join().map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(reason = %reason, "Import worker panicked");
            ArchiveError::Worker(format!("panicked: {reason}"))
        })
    }
}

/// Options for [`spawn_import`].
pub struct ImportJob {
    pub folder: PathBuf,
    pub source_type: SourceType,
    pub config: ImportConfig,
    pub progress: Option<ProgressFn>,
    pub on_complete: Option<Completion>,
}

impl ImportJob {
    pub fn new(folder: impl Into<PathBuf>, source_type: SourceType, config: ImportConfig) -> Self {
        Self {
            folder: folder.into(),
            source_type,
            config,
            progress: None,
            on_complete: None,
        }
    }

    pub fn on_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn on_complete(
        mut self,
        on_complete: impl FnOnce(&Result<ImportReport>) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(on_complete));
        self
    }
}

/// Run `job` against `store` on a new thread.
pub fn spawn_import<S>(store: S, job: ImportJob) -> Result<ImportHandle<S>>
where
    S: MailStore + Send + 'static,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let thread = thread::Builder::new()
        .name("candycane-import".to_string())
        .spawn(move || {
            let ImportJob {
                folder,
                source_type,
                config,
                progress,
                on_complete,
            } = job;

            let mut importer = Importer::new(store, config);
            let result = importer.import_with(&folder, source_type, &token, progress.as_deref());
            match &result {
                Ok(report) => info!(
                    folder = %folder.display(),
                    cancelled = report.cancelled,
                    "Background import finished"
                ),
                Err(e) => error!(folder = %folder.display(), error = %e, "Background import failed"),
            }
            if let Some(callback) = on_complete {
                callback(&result);
            }
            (importer.into_store(), result)
        })
        .map_err(|e| ArchiveError::Worker(e.to_string()))?;

    Ok(ImportHandle { cancel, thread })
}
