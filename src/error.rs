//! Centralized error types for candycane.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the candycane library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file or folder does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A single file or record could not be decoded.
    #[error("Parse error in {location}: {reason}")]
    ParseError { location: String, reason: String },

    /// The database was written with an incompatible schema.
    #[error("Unsupported database schema: {0}")]
    Schema(String),

    /// The primary key is already present in the store.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The embedded SQLite store rejected an operation.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A record could not be serialized for hashing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The source type name is not one of `eml` or `mbox`.
    #[error("Unknown source type '{0}' (expected eml or mbox)")]
    UnknownSourceType(String),

    /// The background import thread could not run to completion.
    #[error("Import worker failed: {0}")]
    Worker(String),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    ///
    /// `NotFound` is reported as [`ArchiveError::FileNotFound`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::FileNotFound(path);
        }
        Self::Io { path, source }
    }

    /// Create a `ParseError` for a location (file path, record offset, …).
    pub fn parse(location: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::ParseError {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    /// `true` for conditions that mean "already stored" rather than failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `ArchiveError`
/// when no path context is available (rare, prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_file_not_found() {
        let err = ArchiveError::io(
            "/nope/missing.eml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ArchiveError::FileNotFound(_)));
    }

    #[test]
    fn test_parse_error_message() {
        let err = ArchiveError::parse("inbox.mbox@120", "missing Date");
        assert_eq!(err.to_string(), "Parse error in inbox.mbox@120: missing Date");
        assert!(!err.is_duplicate());
        assert!(ArchiveError::DuplicateKey("abc".into()).is_duplicate());
    }
}
