//! Content hashing for change detection.
//!
//! The digest only has to notice that a row changed; it is never used for
//! authentication.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::row::Row;

/// Hash stored for rows whose change capture is done by database triggers.
pub const TRIGGER_HASH: &str = "MODIFIED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

/// How rows are fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    /// Digest the row content.
    Content(HashAlgorithm),
    /// An external trigger stamps metadata itself; rows carry `TRIGGER_HASH`.
    Trigger,
}

impl Default for HashMode {
    fn default() -> Self {
        HashMode::Content(HashAlgorithm::default())
    }
}

impl HashMode {
    pub fn is_trigger(&self) -> bool {
        matches!(self, HashMode::Trigger)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RowHasher {
    mode: HashMode,
}

impl RowHasher {
    pub fn new(mode: HashMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Returns `None` when the row has no non-null value.
    pub fn hash(&self, row: &Row) -> Option<String> {
        if !row.has_data() {
            return None;
        }

        let algorithm = match self.mode {
            HashMode::Trigger => return Some(TRIGGER_HASH.to_string()),
            HashMode::Content(algorithm) => algorithm,
        };

        let mut columns: Vec<_> = row.columns().collect();
        columns.sort_by(|a, b| a.0.cmp(b.0));

        let mut canonical = String::new();
        for (_, value) in columns {
            if let Some(text) = value.render() {
                canonical.push_str(&text);
            }
        }

        let digest = match algorithm {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(canonical.as_bytes())),
            HashAlgorithm::Blake3 => blake3::hash(canonical.as_bytes()).to_hex().to_string(),
        };
        Some(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;

    #[test]
    fn test_hash_ignores_insertion_order() {
        let hasher = RowHasher::default();
        let a = Row::new().with("id", 1).with("name", "Alice").with("age", 30);
        let b = Row::new().with("age", 30).with("id", 1).with("name", "Alice");
        assert_eq!(hasher.hash(&a), hasher.hash(&b));
    }

    #[test]
    fn test_hash_detects_changes() {
        let hasher = RowHasher::default();
        let a = Row::new().with("id", 1).with("name", "Alice");
        let b = Row::new().with("id", 1).with("name", "Alicia");
        assert_ne!(hasher.hash(&a), hasher.hash(&b));
    }

    #[test]
    fn test_all_null_row_is_no_data() {
        let hasher = RowHasher::default();
        assert_eq!(hasher.hash(&Row::new()), None);
        assert_eq!(hasher.hash(&Row::new().with("a", Value::Null)), None);
    }

    #[test]
    fn test_nulls_are_skipped() {
        let hasher = RowHasher::default();
        let a = Row::new().with("id", 1).with("note", Value::Null);
        let b = Row::new().with("id", 1);
        assert_eq!(hasher.hash(&a), hasher.hash(&b));
    }

    #[test]
    fn test_algorithms_differ_and_are_hex() {
        let row = Row::new().with("id", 7);
        let sha = RowHasher::new(HashMode::Content(HashAlgorithm::Sha256)).hash(&row).unwrap();
        let b3 = RowHasher::new(HashMode::Content(HashAlgorithm::Blake3)).hash(&row).unwrap();
        assert_eq!(sha.len(), 64);
        assert_eq!(b3.len(), 64);
        assert_ne!(sha, b3);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_trigger_mode_uses_sentinel() {
        let hasher = RowHasher::new(HashMode::Trigger);
        let row = Row::new().with("id", 1);
        assert_eq!(hasher.hash(&row).as_deref(), Some(TRIGGER_HASH));
        assert_eq!(hasher.hash(&Row::new()), None);
    }
}
