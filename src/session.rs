//! Acquisition sessions
//!
//! A session identifies one acquisition run against a source: the UUID of
//! the store that issued it, the calendar day it was issued, and an integer
//! index distinguishing repeated acquisitions on the same day. Sessions are
//! totally ordered by `(date, index)`; the issuing UUID is deliberately
//! excluded from comparisons so that captures from different stores still
//! sort into one timeline.
//!
//! Canonical text forms:
//! - short: `2026-08-05.3` (used in store paths)
//! - full: `<uuid>/2026-08-05.3` (round-trippable, used in container headers)

use crate::error::{Result, VaultError};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// One dated, indexed acquisition identifier
#[derive(Debug, Clone)]
pub struct Session {
    source: Uuid,
    date: NaiveDate,
    index: u32,
}

impl Session {
    /// First session a store issues on a given day
    pub fn initial(source: Uuid, date: NaiveDate) -> Self {
        Session {
            source,
            date,
            index: 1,
        }
    }

    pub fn new(source: Uuid, date: NaiveDate, index: u32) -> Result<Self> {
        if index == 0 {
            return Err(VaultError::SessionParse(
                "session index must be at least 1".to_string(),
            ));
        }
        Ok(Session {
            source,
            date,
            index,
        })
    }

    /// The next session after this one.
    ///
    /// Issued on the same day, the index increments; issued on a later day,
    /// the index resets to 1. A `today` that sorts before the stored date
    /// (clock skew) increments on the stored date so numbering stays
    /// monotonic.
    pub fn successor(&self, today: NaiveDate) -> Session {
        if today > self.date {
            Session {
                source: self.source,
                date: today,
                index: 1,
            }
        } else {
            Session {
                source: self.source,
                date: self.date,
                index: self.index + 1,
            }
        }
    }

    pub fn source(&self) -> Uuid {
        self.source
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Short text form, `date.index`
    pub fn short(&self) -> String {
        format!("{}.{}", self.date.format("%Y-%m-%d"), self.index)
    }

    /// Parse the short form against a known issuing UUID
    pub fn parse_short(source: Uuid, text: &str) -> Result<Session> {
        let (date_text, index_text) = text
            .rsplit_once('.')
            .ok_or_else(|| VaultError::SessionParse(text.to_string()))?;
        let date = NaiveDate::parse_from_str(date_text, "%Y-%m-%d")
            .map_err(|_| VaultError::SessionParse(text.to_string()))?;
        let index: u32 = index_text
            .parse()
            .map_err(|_| VaultError::SessionParse(text.to_string()))?;
        Session::new(source, date, index)
    }
}

impl fmt::Display for Session {
    /// Full text form, `uuid/date.index`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.short())
    }
}

impl FromStr for Session {
    type Err = VaultError;

    fn from_str(text: &str) -> Result<Session> {
        let (uuid_text, rest) = text
            .split_once('/')
            .ok_or_else(|| VaultError::SessionParse(text.to_string()))?;
        let source =
            Uuid::parse_str(uuid_text).map_err(|_| VaultError::SessionParse(text.to_string()))?;
        Session::parse_short(source, rest)
    }
}

// Comparisons ignore the issuing UUID; equality and hashing follow suit so
// the three impls stay consistent with each other.
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.index == other.index
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.date.hash(state);
        self.index.hash(state);
    }
}

impl PartialOrd for Session {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Session {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then(self.index.cmp(&other.index))
    }
}
