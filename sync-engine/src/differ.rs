//! Local change detection against the shadow metadata.

use tracing::debug;

use crate::config::TableConfig;
use crate::error::Result;
use crate::hasher::{HashMode, RowHasher};
use crate::metadata::{Change, Flag, MetadataEntry};
use crate::storage::{in_transaction, Storage};

pub struct TableDiffer {
    hasher: RowHasher,
}

impl TableDiffer {
    pub fn new(mode: HashMode) -> Self {
        Self { hasher: RowHasher::new(mode) }
    }

    /// Changes made to `table` since its last successful sync, sorted by key.
    ///
    /// In content mode the shadow entries are brought up to date as a side
    /// effect. Entries left modified by an interrupted sync are emitted again,
    /// so diffing twice without intervening edits yields the same set.
    pub fn diff_table<S: Storage>(&self, storage: &mut S, table: &str) -> Result<Vec<Change>> {
        let mut changes = in_transaction(storage, |s| {
            if self.hasher.mode().is_trigger() {
                self.captured_changes(s, table)
            } else {
                self.scan_changes(s, table)
            }
        })?;
        changes.sort_by(Change::cmp_key);
        debug!("diff of {} produced {} changes", table, changes.len());
        Ok(changes)
    }

    pub fn diff_all<S: Storage>(&self, storage: &mut S, tables: &[TableConfig]) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for table in tables {
            changes.extend(self.diff_table(storage, &table.name)?);
        }
        changes.sort_by(Change::cmp_key);
        Ok(changes)
    }

    fn scan_changes<S: Storage>(&self, storage: &mut S, table: &str) -> Result<Vec<Change>> {
        let mut changes = Vec::new();

        for (pk, row) in storage.scan_rows(table)? {
            let hash = self.hasher.hash(&row);
            match storage.get_metadata(table, &pk)? {
                None => {
                    let Some(hash) = hash else { continue };
                    let entry = MetadataEntry::new_row(table, pk, hash);
                    storage.insert_metadata(&entry)?;
                    changes.push(Change::new(entry, Some(row)));
                }
                Some(mut entry) if entry.hash != hash => {
                    entry.hash = hash;
                    entry.flag = Flag::Modified;
                    storage.update_metadata(&entry)?;
                    changes.push(Change::new(entry, Some(row)));
                }
                Some(entry) if entry.is_pending() => changes.push(Change::new(entry, Some(row))),
                Some(_) => {}
            }
        }

        for mut entry in storage.orphaned_metadata(table)? {
            if entry.data_row_exists() {
                entry.hash = None;
                entry.flag = Flag::Modified;
                storage.update_metadata(&entry)?;
                changes.push(Change::new(entry, None));
            } else if entry.is_pending() {
                changes.push(Change::new(entry, None));
            }
        }

        Ok(changes)
    }

    // Triggers already stamped every write; nothing to hash or update.
    fn captured_changes<S: Storage>(&self, storage: &mut S, table: &str) -> Result<Vec<Change>> {
        Ok(storage
            .pending_changes(table)?
            .into_iter()
            .map(|(row, mut entry)| {
                if row.is_none() {
                    entry.hash = None;
                }
                Change::new(entry, row)
            })
            .collect())
    }
}
