//! File-hash attribute records
//!
//! Search tooling stores per-file hash inventories against a stored disk as
//! attributes. Any attribute whose key starts with [`FILE_HASH_ATTR_PREFIX`]
//! holds newline-delimited `hashHex path` records; that text sub-format is
//! a contract parsed by external components, so both directions live here.

use crate::error::{Result, VaultError};
use std::fmt::Write as _;

/// Attribute keys carrying file-hash records start with this tag
pub const FILE_HASH_ATTR_PREFIX: &str = "filehash.";

/// Whether an attribute key follows the file-hash convention
pub fn is_file_hash_key(key: &str) -> bool {
    key.starts_with(FILE_HASH_ATTR_PREFIX)
}

/// One `hashHex path` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashRecord {
    /// Raw hash bytes
    pub hash: Vec<u8>,
    /// Path of the hashed file inside the acquired filesystem
    pub path: String,
}

/// Render records as the newline-delimited attribute value
pub fn format_records(records: &[FileHashRecord]) -> Vec<u8> {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(out, "{} {}", hex::encode(&record.hash), record.path);
    }
    out.into_bytes()
}

/// Parse an attribute value back into records.
///
/// Strict: every non-empty line must be `hashHex<space>path` with valid,
/// even-length hex. Paths may contain further spaces.
pub fn parse_records(value: &[u8]) -> Result<Vec<FileHashRecord>> {
    let text = std::str::from_utf8(value)
        .map_err(|_| VaultError::FileHashParse("value is not UTF-8".to_string()))?;
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let (hash_text, path) = line.split_once(' ').ok_or_else(|| {
            VaultError::FileHashParse(format!("missing path on line {}", line_no + 1))
        })?;
        if path.is_empty() {
            return Err(VaultError::FileHashParse(format!(
                "empty path on line {}",
                line_no + 1
            )));
        }
        let hash = hex::decode(hash_text).map_err(|_| {
            VaultError::FileHashParse(format!("bad hex on line {}", line_no + 1))
        })?;
        records.push(FileHashRecord {
            hash,
            path: path.to_string(),
        });
    }
    Ok(records)
}
