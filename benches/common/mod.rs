#![allow(dead_code)]

use std::sync::Arc;

use sync_engine::{
    ConflictStrategy, MemoryStorage, PrimaryKey, Row, ServerEndpoint, SqliteStorage, Storage,
    SyncConfig, SyncDirection, TableConfig, TableSyncStrategy, DEFAULT_METADATA_SUFFIX,
};

pub const FILES: &str = "files";

pub const FILES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL,
        filename TEXT,
        extension TEXT,
        size_bytes INTEGER,
        checksum TEXT,
        mime_type TEXT,
        owner TEXT,
        created_at INTEGER,
        modified_at INTEGER,
        tags TEXT
    );
";

/// A file-index row with eleven columns.
pub fn generate_file_record(idx: usize) -> Row {
    let dirs = ["Documents", "Pictures", "Videos", "Downloads", "Projects"];
    let exts = ["pdf", "jpg", "mp4", "txt", "rs"];
    let owners = ["alice", "bob", "carol", "david"];

    Row::new()
        .with("id", idx as i64)
        .with("path", format!("/{}/file_{}.{}", dirs[idx % 5], idx, exts[idx % 5]))
        .with("filename", format!("file_{}.{}", idx, exts[idx % 5]))
        .with("extension", exts[idx % 5])
        .with("size_bytes", (1000 + idx * 100) as i64)
        .with("checksum", format!("{:064x}", idx as u128 * 0xdeadbeef))
        .with("mime_type", "application/octet-stream")
        .with("owner", owners[idx % 4])
        .with("created_at", 1704067200 + idx as i64)
        .with("modified_at", 1704067200 + idx as i64 + 3600)
        .with("tags", "work,important")
}

/// The same record after a later edit.
pub fn touched_file_record(idx: usize) -> Row {
    generate_file_record(idx)
        .with("modified_at", 1704067200 + idx as i64 + 86400)
        .with("tags", "updated,synced")
}

pub fn files_config(strategy: ConflictStrategy) -> Arc<SyncConfig> {
    let strategy = TableSyncStrategy::new(SyncDirection::Bidirectional, strategy).unwrap();
    Arc::new(SyncConfig::default().with_table(TableConfig::new(FILES, "id").with_strategy(strategy)))
}

pub fn fill<S: Storage>(storage: &mut S, range: std::ops::Range<usize>) {
    storage.begin_transaction().unwrap();
    for i in range {
        storage
            .insert_row(FILES, &PrimaryKey::int(i as i64), &generate_file_record(i))
            .unwrap();
    }
    storage.commit_transaction().unwrap();
}

pub fn touch<S: Storage>(storage: &mut S, range: std::ops::Range<usize>) {
    for i in range {
        storage
            .update_row(FILES, &PrimaryKey::int(i as i64), &touched_file_record(i))
            .unwrap();
    }
}

pub fn create_memory(rows: usize) -> MemoryStorage {
    let mut storage = MemoryStorage::new();
    fill(&mut storage, 0..rows);
    storage
}

pub fn create_sqlite(rows: usize) -> SqliteStorage {
    let mut storage = SqliteStorage::open_in_memory().unwrap();
    storage.connection().execute_batch(FILES_SCHEMA).unwrap();
    storage
        .prepare_table(&TableConfig::new(FILES, "id"), DEFAULT_METADATA_SUFFIX)
        .unwrap();
    fill(&mut storage, 0..rows);
    storage
}

pub fn memory_server(config: &Arc<SyncConfig>, rows: usize) -> ServerEndpoint<MemoryStorage> {
    ServerEndpoint::new(config.clone(), create_memory(rows)).unwrap()
}
