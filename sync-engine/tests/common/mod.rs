//! Shared fixtures for sync integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use sync_engine::{
    Change, ConflictStrategy, Error, MemoryStorage, MetadataEntry, PrimaryKey, ProgressListener,
    RemoteEndpoint, Result, Revision, Row, RowStream, ServerChanges, ServerEndpoint, ShadowRow,
    Storage, SyncConfig, SyncDirection, TableConfig, TableSyncStrategy,
};

pub const USERS: &str = "users";

pub fn user(id: i64, name: &str) -> Row {
    Row::new().with("id", id).with("name", name)
}

pub fn users_config(direction: SyncDirection, strategy: ConflictStrategy) -> Arc<SyncConfig> {
    let strategy = TableSyncStrategy::new(direction, strategy).unwrap();
    Arc::new(SyncConfig::default().with_table(TableConfig::new(USERS, "id").with_strategy(strategy)))
}

pub fn insert(storage: &mut impl Storage, id: i64, name: &str) {
    storage.insert_row(USERS, &PrimaryKey::int(id), &user(id, name)).unwrap();
}

pub fn update(storage: &mut impl Storage, id: i64, name: &str) {
    storage.update_row(USERS, &PrimaryKey::int(id), &user(id, name)).unwrap();
}

pub fn delete(storage: &mut impl Storage, id: i64) {
    assert!(storage.delete_row(USERS, &PrimaryKey::int(id)).unwrap());
}

pub fn name_of(storage: &impl Storage, id: i64) -> Option<String> {
    storage
        .get_row(USERS, &PrimaryKey::int(id))
        .unwrap()
        .and_then(|row| row.get_text("name").map(str::to_string))
}

/// `(id, name)` pairs of every user row, in id order.
pub fn user_names(storage: &impl Storage) -> Vec<(i64, String)> {
    let mut rows: Vec<_> = storage
        .scan_rows(USERS)
        .unwrap()
        .map(|(_, row)| {
            let id = match row.get("id") {
                Some(sync_engine::Value::Integer(id)) => *id,
                other => panic!("unexpected id {:?}", other),
            };
            (id, row.get_text("name").unwrap_or_default().to_string())
        })
        .collect();
    rows.sort();
    rows
}

/// Server with `ids` already present and stamped.
pub fn seeded_server(config: Arc<SyncConfig>, ids: &[i64]) -> ServerEndpoint<MemoryStorage> {
    let mut server = ServerEndpoint::new(config, MemoryStorage::new()).unwrap();
    for id in ids {
        insert(server.storage_mut(), *id, &format!("user{}", id));
    }
    server.capture_local_changes().unwrap();
    server
}

/// Records progress callbacks.
#[derive(Clone, Default)]
pub struct ProgressLog {
    pub messages: Rc<RefCell<Vec<String>>>,
    pub finished: Rc<Cell<u32>>,
}

impl ProgressListener for ProgressLog {
    fn on_progress(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }

    fn on_finished(&self) {
        self.finished.set(self.finished.get() + 1);
    }
}

/// Server wrapper that makes a direct server edit right before the next
/// `interference` pushes, so those pushes see a moved revision.
pub struct InterferingServer {
    pub inner: ServerEndpoint<MemoryStorage>,
    pub interference: u32,
    next_id: i64,
}

impl InterferingServer {
    pub fn new(inner: ServerEndpoint<MemoryStorage>, interference: u32) -> Self {
        Self { inner, interference, next_id: 1000 }
    }
}

impl RemoteEndpoint for InterferingServer {
    fn fetch_changes(&mut self, since: Revision) -> Result<ServerChanges> {
        self.inner.fetch_changes(since)
    }

    fn push_changes(&mut self, base_revision: Revision, changes: &[Change]) -> Result<Revision> {
        if self.interference > 0 {
            self.interference -= 1;
            self.next_id += 1;
            insert(self.inner.storage_mut(), self.next_id, "server edit");
        }
        self.inner.push_changes(base_revision, changes)
    }
}

/// Storage whose row scans fail with a transient error, and whose row
/// inserts fail with an integrity error, a set number of times.
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub scan_failures: Cell<u32>,
    pub scans: Cell<u32>,
    pub insert_failures: u32,
}

impl FlakyStorage {
    pub fn new(inner: MemoryStorage, scan_failures: u32) -> Self {
        Self { inner, scan_failures: Cell::new(scan_failures), scans: Cell::new(0), insert_failures: 0 }
    }

    pub fn with_insert_failures(mut self, failures: u32) -> Self {
        self.insert_failures = failures;
        self
    }
}

impl Storage for FlakyStorage {
    fn prepare_table(&mut self, table: &TableConfig, metadata_suffix: &str) -> Result<()> {
        self.inner.prepare_table(table, metadata_suffix)
    }

    fn scan_rows(&self, table: &str) -> Result<RowStream> {
        self.scans.set(self.scans.get() + 1);
        if self.scan_failures.get() > 0 {
            self.scan_failures.set(self.scan_failures.get() - 1);
            return Err(Error::Transient("database is locked".into()));
        }
        self.inner.scan_rows(table)
    }

    fn get_row(&self, table: &str, pk: &PrimaryKey) -> Result<Option<Row>> {
        self.inner.get_row(table, pk)
    }

    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        if self.insert_failures > 0 {
            self.insert_failures -= 1;
            return Err(Error::Integrity(format!("UNIQUE constraint failed: {}.id", table)));
        }
        self.inner.insert_row(table, pk, row)
    }

    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        self.inner.update_row(table, pk, row)
    }

    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> Result<bool> {
        self.inner.delete_row(table, pk)
    }

    fn get_metadata(&self, table: &str, pk: &PrimaryKey) -> Result<Option<MetadataEntry>> {
        self.inner.get_metadata(table, pk)
    }

    fn insert_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        self.inner.insert_metadata(entry)
    }

    fn update_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        self.inner.update_metadata(entry)
    }

    fn update_revision(&mut self, table: &str, pk: &PrimaryKey, revision: Revision) -> Result<usize> {
        self.inner.update_revision(table, pk, revision)
    }

    fn orphaned_metadata(&self, table: &str) -> Result<Vec<MetadataEntry>> {
        self.inner.orphaned_metadata(table)
    }

    fn pending_changes(&self, table: &str) -> Result<Vec<ShadowRow>> {
        self.inner.pending_changes(table)
    }

    fn changes_since(&self, table: &str, revision: Revision) -> Result<Vec<ShadowRow>> {
        self.inner.changes_since(table, revision)
    }

    fn load_revision(&self) -> Result<Revision> {
        self.inner.load_revision()
    }

    fn store_revision(&mut self, revision: Revision) -> Result<()> {
        self.inner.store_revision(revision)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.inner.commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.inner.rollback_transaction()
    }
}
