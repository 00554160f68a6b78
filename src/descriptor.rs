//! Disk identity and store descriptors
//!
//! A [`DiskId`] is the stable identity string of an acquired source.
//! Descriptors are embedded in file paths, URLs, and message-bus routing
//! keys, so the accepted character set is deliberately narrow.

use crate::error::{Result, VaultError};
use crate::session::Session;
use regex::Regex;
use std::fmt;

/// Validated disk identity string
///
/// # Rules
/// - First character: letter or digit
/// - Remaining characters: letters, digits, `.`, `_`, `-`
/// - Length: 1-64 bytes (fits the fixed-width header field)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskId(String);

impl DiskId {
    const PATTERN: &'static str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

    /// Maximum length in bytes
    pub const MAX_LENGTH: usize = 64;

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(VaultError::InvalidDiskId(
                "disk identity cannot be empty".to_string(),
            ));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(VaultError::InvalidDiskId(format!(
                "disk identity too long (max {} bytes)",
                Self::MAX_LENGTH
            )));
        }
        let re = Regex::new(Self::PATTERN).unwrap();
        if !re.is_match(&id) {
            return Err(VaultError::InvalidDiskId(format!(
                "{id:?} (allowed: letters, digits, '.', '_', '-'; must start with a letter or digit)"
            )));
        }
        Ok(DiskId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary key of one stored disk image: `(disk identity, session)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskDescriptor {
    disk: DiskId,
    session: Session,
}

impl DiskDescriptor {
    pub fn new(disk: DiskId, session: Session) -> Self {
        DiskDescriptor { disk, session }
    }

    pub fn disk(&self) -> &DiskId {
        &self.disk
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl fmt::Display for DiskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.disk, self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn test_valid_disk_ids() {
        for id in ["sda", "disk-07", "WD-WCC4N5PF96KL", "img_2026.raw", "0"] {
            assert!(DiskId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn test_invalid_disk_ids() {
        for id in ["", "-leading", ".hidden", "a/b", "a b", "dev:sda", "a\0b"] {
            assert!(DiskId::new(id).is_err(), "{id:?} should be rejected");
        }
        let long = "x".repeat(65);
        assert!(DiskId::new(long).is_err());
    }

    #[test]
    fn test_descriptor_equality_combines_both_fields() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        let session = Session::initial(Uuid::new_v4(), date);
        let a = DiskDescriptor::new(DiskId::new("sda").unwrap(), session.clone());
        let b = DiskDescriptor::new(DiskId::new("sda").unwrap(), session.clone());
        let c = DiskDescriptor::new(DiskId::new("sdb").unwrap(), session.clone());
        let d = DiskDescriptor::new(
            DiskId::new("sda").unwrap(),
            session.successor(date),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
