use tracing::trace;

use crate::error::{Error, Result};
use crate::hasher::{HashMode, RowHasher};
use crate::metadata::{Change, Flag, MetadataEntry, Revision, ShadowStore};
use crate::storage::{in_transaction, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Deleted,
    /// The row was already gone; only the tombstone was written.
    AlreadyDeleted,
}

/// Writes incoming changes to one side. The data row is always written
/// before its shadow entry.
pub struct ChangeApplier {
    hasher: RowHasher,
}

impl ChangeApplier {
    pub fn new(mode: HashMode) -> Self {
        Self { hasher: RowHasher::new(mode) }
    }

    /// Applies `change` and records it as processed at `revision`. Must run
    /// inside a transaction opened by the caller.
    pub fn apply<S: Storage>(&self, storage: &mut S, change: &Change, revision: Revision) -> Result<ApplyOutcome> {
        self.apply_flagged(storage, change, revision, Flag::Processed)
    }

    /// Applies each change at its own revision in a single transaction.
    /// Changes flagged `Modified` stay pending so the next diff offers them
    /// again.
    pub fn apply_batch<S: Storage>(&self, storage: &mut S, changes: &[Change]) -> Result<Vec<ApplyOutcome>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        in_transaction(storage, |s| {
            changes
                .iter()
                .map(|change| self.apply_flagged(s, change, change.revision(), change.entry.flag))
                .collect()
        })
    }

    fn apply_flagged<S: Storage>(
        &self,
        storage: &mut S,
        change: &Change,
        revision: Revision,
        flag: Flag,
    ) -> Result<ApplyOutcome> {
        let table = change.table();
        let pk = change.primary_key();

        if change.is_deletion() {
            let removed = storage.delete_row(table, pk)?;
            let tombstone = MetadataEntry { flag, ..MetadataEntry::tombstone(table, pk.clone(), revision) };
            Self::write_entry(storage, tombstone)?;
            trace!("applied deletion of {}[{}] at {}", table, pk, revision);
            return Ok(if removed { ApplyOutcome::Deleted } else { ApplyOutcome::AlreadyDeleted });
        }

        let row = change
            .row
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("change for {}[{}] has no row", table, pk)))?;

        let outcome = if storage.get_row(table, pk)?.is_some() {
            storage.update_row(table, pk, row)?;
            ApplyOutcome::Updated
        } else {
            storage.insert_row(table, pk, row)?;
            ApplyOutcome::Inserted
        };

        // Hash what the store kept; type affinity may have normalized values.
        let stored = storage.get_row(table, pk)?;
        let hash = self.hasher.hash(stored.as_ref().unwrap_or(row));
        let entry = MetadataEntry {
            table: table.to_string(),
            primary_key: pk.clone(),
            revision,
            hash,
            flag,
        };
        Self::write_entry(storage, entry)?;
        trace!("applied {:?} of {}[{}] at {}", outcome, table, pk, revision);
        Ok(outcome)
    }

    // Existence is checked after the data write: triggers or an earlier
    // interleaved sync may have created the entry already.
    fn write_entry<S: Storage>(storage: &mut S, mut entry: MetadataEntry) -> Result<()> {
        let mut shadow = ShadowStore::new(storage);
        match shadow.get_entry(&entry.table, &entry.primary_key)? {
            Some(existing) => {
                entry.revision = entry.revision.max(existing.revision);
                shadow.update_entry(&entry)
            }
            None => shadow.insert_entry(&entry),
        }
    }
}
