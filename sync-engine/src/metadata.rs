//! Shadow metadata kept next to every synchronized table, and the `Change`
//! records built from it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::row::{PrimaryKey, Row};
use crate::storage::Storage;

pub type Revision = u64;

/// Revision of an entry that has never been confirmed by a sync.
pub const INITIAL_REVISION: Revision = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// In sync with the other side.
    Processed,
    /// Changed locally since the last sync.
    Modified,
    /// Removed locally since the last sync. Only written by trigger capture.
    Deleted,
}

impl Flag {
    pub fn code(self) -> &'static str {
        match self {
            Flag::Processed => "P",
            Flag::Modified => "M",
            Flag::Deleted => "D",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "P" => Ok(Flag::Processed),
            "M" => Ok(Flag::Modified),
            "D" => Ok(Flag::Deleted),
            other => Err(Error::InvalidState(format!("unknown metadata flag {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub table: String,
    pub primary_key: PrimaryKey,
    pub revision: Revision,
    /// Content hash, `None` once the data row is gone.
    pub hash: Option<String>,
    pub flag: Flag,
}

impl MetadataEntry {
    /// Entry for a row seen for the first time.
    pub fn new_row(table: &str, primary_key: PrimaryKey, hash: String) -> Self {
        Self {
            table: table.to_string(),
            primary_key,
            revision: INITIAL_REVISION,
            hash: Some(hash),
            flag: Flag::Modified,
        }
    }

    pub fn tombstone(table: &str, primary_key: PrimaryKey, revision: Revision) -> Self {
        Self {
            table: table.to_string(),
            primary_key,
            revision,
            hash: None,
            flag: Flag::Processed,
        }
    }

    pub fn data_row_exists(&self) -> bool {
        self.hash.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.flag != Flag::Processed
    }

    pub fn key(&self) -> (&str, &PrimaryKey) {
        (&self.table, &self.primary_key)
    }
}

/// One row's state at the time a change set was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub entry: MetadataEntry,
    /// `None` for deletions.
    pub row: Option<Row>,
}

impl Change {
    pub fn new(entry: MetadataEntry, row: Option<Row>) -> Self {
        Self { entry, row }
    }

    pub fn table(&self) -> &str {
        &self.entry.table
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.entry.primary_key
    }

    pub fn revision(&self) -> Revision {
        self.entry.revision
    }

    pub fn is_deletion(&self) -> bool {
        !self.entry.data_row_exists() || self.row.is_none()
    }

    pub fn key(&self) -> (&str, &PrimaryKey) {
        self.entry.key()
    }

    /// Ordering used for matching: table name, then primary key.
    pub fn cmp_key(&self, other: &Change) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Metadata accessors over a storage adapter.
pub struct ShadowStore<'a, S: Storage> {
    storage: &'a mut S,
}

impl<'a, S: Storage> ShadowStore<'a, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self { storage }
    }

    pub fn get_entry(&self, table: &str, pk: &PrimaryKey) -> Result<Option<MetadataEntry>> {
        self.storage.get_metadata(table, pk)
    }

    pub fn insert_entry(&mut self, entry: &MetadataEntry) -> Result<()> {
        self.storage.insert_metadata(entry)
    }

    pub fn update_entry(&mut self, entry: &MetadataEntry) -> Result<()> {
        self.storage.update_metadata(entry)
    }

    /// Inserts or updates depending on whether an entry already exists.
    pub fn upsert_entry(&mut self, entry: &MetadataEntry) -> Result<()> {
        if self.storage.get_metadata(&entry.table, &entry.primary_key)?.is_some() {
            self.storage.update_metadata(entry)
        } else {
            self.storage.insert_metadata(entry)
        }
    }

    /// Confirms a row at `revision`. Anything other than exactly one affected
    /// row is logged and tolerated: the row may have been removed concurrently.
    pub fn update_revision(&mut self, table: &str, pk: &PrimaryKey, revision: Revision) -> Result<usize> {
        let affected = self.storage.update_revision(table, pk, revision)?;
        if affected != 1 {
            warn!(
                "revision update for {}[{}] to {} affected {} rows",
                table, pk, revision, affected
            );
        }
        Ok(affected)
    }
}
