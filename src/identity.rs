//! Content-derived message identifiers.
//!
//! Identifiers are full SHA-256 digests rendered as 64 lowercase hex
//! characters and stored as opaque text keys. EML files hash their raw bytes.
//! MBOX records hash a canonical bincode serialization of the decoded record,
//! because the raw bytes of a record depend on where it sits in the archive.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Identifier for a raw byte payload.
pub fn content_id(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Identifier for a serializable record.
///
/// Deterministic for a given value: bincode encodes fields in declaration
/// order with fixed-width lengths.
pub fn record_id<T: Serialize>(record: &T) -> Result<String> {
    let bytes = bincode::serialize(record)?;
    Ok(content_id(&bytes))
}

fn to_hex(digest: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
