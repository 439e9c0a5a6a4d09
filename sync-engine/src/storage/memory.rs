use std::collections::{BTreeMap, HashMap};

use super::{RowStream, ShadowRow, Storage};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::hasher::TRIGGER_HASH;
use crate::metadata::{Flag, MetadataEntry, Revision, INITIAL_REVISION};
use crate::row::{PrimaryKey, Row};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<PrimaryKey, Row>>,
    metadata: HashMap<String, BTreeMap<PrimaryKey, MetadataEntry>>,
    revision: Revision,
}

/// In-process storage. Transactions snapshot the whole state on begin and
/// restore it on rollback.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: MemoryState,
    snapshot: Option<MemoryState>,
    capture_changes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulates database triggers: every data write stamps the row's shadow
    /// entry as modified (or deleted) the way `HashMode::Trigger` expects.
    pub fn with_change_capture() -> Self {
        Self { capture_changes: true, ..Self::default() }
    }

    /// All rows of a table, in key order.
    pub fn rows(&self, table: &str) -> Vec<(PrimaryKey, Row)> {
        self.state
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// All shadow entries of a table, in key order.
    pub fn metadata_entries(&self, table: &str) -> Vec<MetadataEntry> {
        self.state
            .metadata
            .get(table)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn captured(&mut self, table: &str, pk: &PrimaryKey, hash: Option<String>, flag: Flag) {
        let entries = self.state.metadata.entry(table.to_string()).or_default();
        let entry = entries.entry(pk.clone()).or_insert_with(|| MetadataEntry {
            table: table.to_string(),
            primary_key: pk.clone(),
            revision: INITIAL_REVISION,
            hash: None,
            flag,
        });
        entry.hash = hash;
        entry.flag = flag;
    }

    fn shadow_rows<'a>(
        &self,
        table: &str,
        entries: impl Iterator<Item = &'a MetadataEntry>,
    ) -> Vec<ShadowRow> {
        let rows = self.state.tables.get(table);
        entries
            .map(|entry| {
                let row = rows.and_then(|r| r.get(&entry.primary_key)).cloned();
                (row, entry.clone())
            })
            .collect()
    }
}

impl Storage for MemoryStorage {
    fn prepare_table(&mut self, table: &TableConfig, _metadata_suffix: &str) -> Result<()> {
        self.state.tables.entry(table.name.clone()).or_default();
        self.state.metadata.entry(table.name.clone()).or_default();
        Ok(())
    }

    fn scan_rows(&self, table: &str) -> Result<RowStream> {
        Ok(Box::new(self.rows(table).into_iter()))
    }

    fn get_row(&self, table: &str, pk: &PrimaryKey) -> Result<Option<Row>> {
        Ok(self.state.tables.get(table).and_then(|rows| rows.get(pk)).cloned())
    }

    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        let rows = self.state.tables.entry(table.to_string()).or_default();
        if rows.contains_key(pk) {
            return Err(Error::Integrity(format!("duplicate key {} in {}", pk, table)));
        }
        rows.insert(pk.clone(), row.clone());
        if self.capture_changes {
            self.captured(table, pk, Some(TRIGGER_HASH.to_string()), Flag::Modified);
        }
        Ok(())
    }

    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        let slot = self
            .state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(pk))
            .ok_or_else(|| Error::InvalidState(format!("no row {} in {} to update", pk, table)))?;
        *slot = row.clone();
        if self.capture_changes {
            self.captured(table, pk, Some(TRIGGER_HASH.to_string()), Flag::Modified);
        }
        Ok(())
    }

    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> Result<bool> {
        let removed = self
            .state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.remove(pk))
            .is_some();
        if removed && self.capture_changes {
            self.captured(table, pk, None, Flag::Deleted);
        }
        Ok(removed)
    }

    fn get_metadata(&self, table: &str, pk: &PrimaryKey) -> Result<Option<MetadataEntry>> {
        Ok(self.state.metadata.get(table).and_then(|m| m.get(pk)).cloned())
    }

    fn insert_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        let entries = self.state.metadata.entry(entry.table.clone()).or_default();
        if entries.contains_key(&entry.primary_key) {
            return Err(Error::Integrity(format!(
                "duplicate metadata for {} in {}",
                entry.primary_key, entry.table
            )));
        }
        entries.insert(entry.primary_key.clone(), entry.clone());
        Ok(())
    }

    fn update_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        let slot = self
            .state
            .metadata
            .get_mut(&entry.table)
            .and_then(|m| m.get_mut(&entry.primary_key))
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "no metadata for {} in {} to update",
                    entry.primary_key, entry.table
                ))
            })?;
        *slot = entry.clone();
        Ok(())
    }

    fn update_revision(&mut self, table: &str, pk: &PrimaryKey, revision: Revision) -> Result<usize> {
        match self.state.metadata.get_mut(table).and_then(|m| m.get_mut(pk)) {
            Some(entry) if entry.revision <= revision => {
                entry.revision = revision;
                entry.flag = Flag::Processed;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn orphaned_metadata(&self, table: &str) -> Result<Vec<MetadataEntry>> {
        let rows = self.state.tables.get(table);
        Ok(self
            .state
            .metadata
            .get(table)
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| !rows.is_some_and(|r| r.contains_key(&e.primary_key)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn pending_changes(&self, table: &str) -> Result<Vec<ShadowRow>> {
        Ok(match self.state.metadata.get(table) {
            Some(entries) => self.shadow_rows(table, entries.values().filter(|e| e.is_pending())),
            None => Vec::new(),
        })
    }

    fn changes_since(&self, table: &str, revision: Revision) -> Result<Vec<ShadowRow>> {
        Ok(match self.state.metadata.get(table) {
            Some(entries) => {
                self.shadow_rows(table, entries.values().filter(|e| e.revision > revision))
            }
            None => Vec::new(),
        })
    }

    fn load_revision(&self) -> Result<Revision> {
        Ok(self.state.revision)
    }

    fn store_revision(&mut self, revision: Revision) -> Result<()> {
        self.state.revision = revision;
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.state.clone());
        }
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, name: &str) -> Row {
        Row::new().with("id", id).with("name", name)
    }

    #[test]
    fn test_basic_operations() {
        let mut storage = MemoryStorage::new();
        let pk = PrimaryKey::int(1);

        storage.insert_row("users", &pk, &row(1, "Alice")).unwrap();
        assert_eq!(storage.get_row("users", &pk).unwrap(), Some(row(1, "Alice")));

        let dup = storage.insert_row("users", &pk, &row(1, "Bob"));
        assert!(matches!(dup, Err(Error::Integrity(_))));

        storage.update_row("users", &pk, &row(1, "Alicia")).unwrap();
        assert_eq!(storage.scan_rows("users").unwrap().count(), 1);

        assert!(storage.delete_row("users", &pk).unwrap());
        assert!(!storage.delete_row("users", &pk).unwrap());
        assert!(storage.update_row("users", &pk, &row(1, "x")).is_err());
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut storage = MemoryStorage::new();
        storage.insert_row("t", &PrimaryKey::int(1), &row(1, "a")).unwrap();

        storage.begin_transaction().unwrap();
        storage.delete_row("t", &PrimaryKey::int(1)).unwrap();
        storage.store_revision(9).unwrap();
        storage.rollback_transaction().unwrap();

        assert!(storage.get_row("t", &PrimaryKey::int(1)).unwrap().is_some());
        assert_eq!(storage.load_revision().unwrap(), 0);
    }

    #[test]
    fn test_orphans_and_feeds() {
        let mut storage = MemoryStorage::new();
        storage.insert_row("t", &PrimaryKey::int(1), &row(1, "a")).unwrap();
        storage
            .insert_metadata(&MetadataEntry::new_row("t", PrimaryKey::int(1), "h1".into()))
            .unwrap();
        storage
            .insert_metadata(&MetadataEntry::tombstone("t", PrimaryKey::int(2), 5))
            .unwrap();

        let orphans = storage.orphaned_metadata("t").unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].primary_key, PrimaryKey::int(2));

        let pending = storage.pending_changes("t").unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].0.is_some());

        let since = storage.changes_since("t", 1).unwrap();
        assert_eq!(since.len(), 1);
        assert!(since[0].0.is_none());
    }

    #[test]
    fn test_update_revision_never_lowers() {
        let mut storage = MemoryStorage::new();
        storage
            .insert_metadata(&MetadataEntry::tombstone("t", PrimaryKey::int(1), 5))
            .unwrap();
        assert_eq!(storage.update_revision("t", &PrimaryKey::int(1), 3).unwrap(), 0);
        assert_eq!(storage.update_revision("t", &PrimaryKey::int(1), 6).unwrap(), 1);
        assert_eq!(storage.get_metadata("t", &PrimaryKey::int(1)).unwrap().unwrap().revision, 6);
    }

    #[test]
    fn test_change_capture_stamps_metadata() {
        let mut storage = MemoryStorage::with_change_capture();
        let pk = PrimaryKey::int(1);
        storage.insert_row("t", &pk, &row(1, "a")).unwrap();

        let entry = storage.get_metadata("t", &pk).unwrap().unwrap();
        assert_eq!(entry.flag, Flag::Modified);
        assert_eq!(entry.hash.as_deref(), Some(TRIGGER_HASH));

        storage.update_revision("t", &pk, 2).unwrap();
        storage.delete_row("t", &pk).unwrap();
        let entry = storage.get_metadata("t", &pk).unwrap().unwrap();
        assert_eq!(entry.flag, Flag::Deleted);
        assert_eq!(entry.hash, None);
        assert_eq!(entry.revision, 2);
    }
}
