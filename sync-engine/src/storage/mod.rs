mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use crate::config::TableConfig;
use crate::error::Result;
use crate::metadata::{MetadataEntry, Revision};
use crate::row::{PrimaryKey, Row};

/// Finite, non-restartable sequence of `(key, row)` pairs from one table.
/// Both adapters materialize the whole table before returning, so the
/// stream holds no cursor and the caller may write to the storage while
/// iterating.
pub type RowStream = Box<dyn Iterator<Item = (PrimaryKey, Row)>>;

/// A row together with its shadow entry; the row is `None` when the data
/// row is gone.
pub type ShadowRow = (Option<Row>, MetadataEntry);

/// Row and metadata access the engine needs from a database.
pub trait Storage {
    /// Creates the metadata companion table for `table` if it is missing.
    fn prepare_table(&mut self, table: &TableConfig, metadata_suffix: &str) -> Result<()>;

    fn scan_rows(&self, table: &str) -> Result<RowStream>;
    fn get_row(&self, table: &str, pk: &PrimaryKey) -> Result<Option<Row>>;
    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()>;
    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()>;
    /// Returns whether a row was removed.
    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> Result<bool>;

    fn get_metadata(&self, table: &str, pk: &PrimaryKey) -> Result<Option<MetadataEntry>>;
    fn insert_metadata(&mut self, entry: &MetadataEntry) -> Result<()>;
    fn update_metadata(&mut self, entry: &MetadataEntry) -> Result<()>;
    /// Marks the entry processed at `revision`. Never lowers a revision;
    /// returns the number of entries touched.
    fn update_revision(&mut self, table: &str, pk: &PrimaryKey, revision: Revision) -> Result<usize>;

    /// Shadow entries whose data row no longer exists.
    fn orphaned_metadata(&self, table: &str) -> Result<Vec<MetadataEntry>>;
    /// Entries whose flag is not processed.
    fn pending_changes(&self, table: &str) -> Result<Vec<ShadowRow>>;
    /// Entries with a revision strictly greater than `revision`.
    fn changes_since(&self, table: &str, revision: Revision) -> Result<Vec<ShadowRow>>;

    /// The endpoint's revision watermark: last synced revision on a client,
    /// current revision on a server.
    fn load_revision(&self) -> Result<Revision>;
    fn store_revision(&mut self, revision: Revision) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;
    fn commit_transaction(&mut self) -> Result<()>;
    fn rollback_transaction(&mut self) -> Result<()>;
}

/// Runs `f` inside a transaction, rolling back when it fails.
pub fn in_transaction<S, T, F>(storage: &mut S, f: F) -> Result<T>
where
    S: Storage + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    storage.begin_transaction()?;
    match f(storage).and_then(|value| storage.commit_transaction().map(|_| value)) {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Err(rollback) = storage.rollback_transaction() {
                tracing::warn!("rollback failed after {}: {}", e, rollback);
            }
            Err(e)
        }
    }
}
