//! Fully-qualified model ids (`collection/id`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between collection and id in the textual form.
pub const KEYSEPARATOR: char = '/';

/// A `(collection, id)` pair, written on the wire as `"collection/id"`.
///
/// Ordering is by collection name first, then numerically by id, so that
/// iteration over a `BTreeMap<Fqid, _>` groups models per collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqid {
    pub collection: String,
    pub id: u64,
}

/// Error returned when parsing a malformed fqid string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fqid '{raw}': expected '<collection>/<positive id>'")]
pub struct InvalidFqid {
    pub raw: String,
}

impl Fqid {
    #[must_use]
    pub fn new(collection: impl Into<String>, id: u64) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }

    /// Build the fqid of the `field` on this model (`collection/id/field`).
    #[must_use]
    pub fn fqfield(&self, field: &str) -> String {
        format!("{self}{KEYSEPARATOR}{field}")
    }
}

impl fmt::Display for Fqid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEYSEPARATOR}{}", self.collection, self.id)
    }
}

impl FromStr for Fqid {
    type Err = InvalidFqid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidFqid { raw: s.to_string() };
        let (collection, id) = s.split_once(KEYSEPARATOR).ok_or_else(invalid)?;
        if !is_collection_name(collection) {
            return Err(invalid());
        }
        let id = parse_id(id).ok_or_else(invalid)?;
        Ok(Self::new(collection, id))
    }
}

impl Serialize for Fqid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fqid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a positive decimal id without sign, leading zeros or whitespace.
#[must_use]
pub fn parse_id(raw: &str) -> Option<u64> {
    if raw.is_empty() || raw.starts_with('0') || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Collection names are lowercase snake case.
#[must_use]
pub fn is_collection_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw.starts_with(|c: char| c.is_ascii_lowercase())
        && raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
