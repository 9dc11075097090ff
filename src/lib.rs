//! `candycane`: archive EML files and MBOX exports into a local SQLite store.
//!
//! This crate provides the ingestion pipeline (format adapters, content
//! hashing, Gmail chat reconciliation), the storage layer, and the import
//! orchestration used by the `candycane` binary.

pub mod config;
pub mod error;
pub mod identity;
pub mod import;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod store;
