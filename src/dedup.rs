//! Content identity for fetched records
//!
//! A record's identity is the SHA-256 of its normalized content. Normalization
//! removes transport artifacts (byte-order marks, zero-width characters, line
//! ending and whitespace differences) so that the same upstream text always
//! hashes the same way. The [`Deduplicator`] keeps the hashes seen during one
//! run as a fast pre-filter; the storage unique constraint stays authoritative.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::Record;

/// Outcome of classifying a record against the hashes seen this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First time this content is seen in the run
    New,
    /// Content already seen in the run
    Duplicate,
}

/// Canonical text form used for hashing.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}'))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize JSON with object keys sorted at every level.
///
/// Used as the hashed content when no dedicated content field is configured,
/// so key order in the response does not change identity.
///
/// Keys are sorted here rather than relying on `serde_json::Map` being a
/// `BTreeMap`: any crate in the build enabling serde_json's `preserve_order`
/// feature turns it into an insertion-ordered map, which would change the
/// hashes of records already in the database.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// In-run membership set of content hashes.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and remember the record's hash.
    pub fn classify(&mut self, record: &Record) -> Classification {
        if self.seen.insert(record.content_hash.clone()) {
            Classification::New
        } else {
            Classification::Duplicate
        }
    }

    /// Whether `hash` was seen this run.
    pub fn contains(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    /// Number of distinct hashes seen.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been classified yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
