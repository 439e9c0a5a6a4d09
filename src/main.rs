//! shadowsync demo
//!
//! Seeds a server store, syncs a client against it, makes random edits on
//! both sides and syncs again, printing each session report as JSON.
//!
//! Usage:
//!   shadowsync-demo [--client client.db] [--server server.db] [--config sync.json]
//!                   [--rows 50] [--edits 10] [--seed 7]
//!
//! Stores default to in-memory databases. Set RUST_LOG=debug for phase logs.

use std::env;
use std::error::Error;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sync_engine::{
    ConflictDecision, ConflictStrategy, PrimaryKey, ProgressListener, Row, ServerEndpoint,
    SqliteStorage, Storage, SyncAgent, SyncConfig, SyncDirection, SyncReport, TableConfig,
    TableSyncStrategy,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT
    );
    CREATE TABLE IF NOT EXISTS catalog (
        sku TEXT PRIMARY KEY,
        price INTEGER NOT NULL
    );
";

struct LogProgress;

impl ProgressListener for LogProgress {
    fn on_progress(&self, message: &str) {
        info!("sync: {}", message);
    }

    fn on_finished(&self) {
        info!("sync: finished");
    }
}

/// Keeps the client's title and joins both bodies.
fn merge_notes(_: &str, _: &PrimaryKey, server: Option<&Row>, client: Option<&Row>) -> ConflictDecision {
    match (server, client) {
        (Some(server), Some(client)) => {
            let mut merged = client.clone();
            let body = format!(
                "{} / {}",
                server.get_text("body").unwrap_or_default(),
                client.get_text("body").unwrap_or_default()
            );
            merged.insert("body", body);
            ConflictDecision::Merged(merged)
        }
        (Some(_), None) => ConflictDecision::KeepServer,
        _ => ConflictDecision::KeepClient,
    }
}

fn default_config() -> Result<SyncConfig, Box<dyn Error>> {
    let notes = TableSyncStrategy::new(SyncDirection::Bidirectional, ConflictStrategy::FireEvent)?;
    let catalog = TableSyncStrategy::new(SyncDirection::ServerToClient, ConflictStrategy::ServerWins)?;
    Ok(SyncConfig::default()
        .with_table(TableConfig::new("notes", "id").with_strategy(notes))
        .with_table(TableConfig::new("catalog", "sku").with_strategy(catalog)))
}

fn open_store(path: Option<&str>) -> Result<SqliteStorage, Box<dyn Error>> {
    let storage = SqliteStorage::open(path.unwrap_or(":memory:"))?;
    storage.connection().execute_batch(SCHEMA)?;
    Ok(storage)
}

fn note(id: i64, title: &str, body: &str) -> Row {
    Row::new().with("id", id).with("title", title).with("body", body)
}

fn seed_server(storage: &mut SqliteStorage, rows: i64) -> Result<(), Box<dyn Error>> {
    storage.begin_transaction()?;
    for id in 1..=rows {
        let pk = PrimaryKey::int(id);
        if storage.get_row("notes", &pk)?.is_none() {
            storage.insert_row("notes", &pk, &note(id, &format!("note {}", id), "draft"))?;
        }
    }
    for (sku, price) in [("apple", 120), ("pear", 95), ("plum", 60)] {
        let pk = PrimaryKey::text(sku);
        if storage.get_row("catalog", &pk)?.is_none() {
            storage.insert_row("catalog", &pk, &Row::new().with("sku", sku).with("price", price))?;
        }
    }
    storage.commit_transaction()?;
    Ok(())
}

/// Random note edits; returns how many were made.
fn random_edits(
    storage: &mut SqliteStorage,
    rng: &mut StdRng,
    rows: i64,
    edits: usize,
    side: &str,
) -> Result<usize, Box<dyn Error>> {
    let mut made = 0;
    for n in 0..edits {
        let id = rng.gen_range(1..=rows);
        let pk = PrimaryKey::int(id);
        let exists = storage.get_row("notes", &pk)?.is_some();

        match rng.gen_range(0..10) {
            0 if exists => {
                storage.delete_row("notes", &pk)?;
            }
            _ if exists => {
                let row = note(id, &format!("note {} ({})", id, side), &format!("{} edit {}", side, n));
                storage.update_row("notes", &pk, &row)?;
            }
            _ => {
                storage.insert_row("notes", &pk, &note(id, &format!("note {}", id), side))?;
            }
        }
        made += 1;
    }
    Ok(made)
}

fn arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn print_report(label: &str, report: &SyncReport) -> Result<(), Box<dyn Error>> {
    println!("== {} ==", label);
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let rows: i64 = arg(&args, "--rows").and_then(|s| s.parse().ok()).unwrap_or(50);
    let edits: usize = arg(&args, "--edits").and_then(|s| s.parse().ok()).unwrap_or(10);
    let seed: u64 = arg(&args, "--seed").and_then(|s| s.parse().ok()).unwrap_or(7);

    let config = Arc::new(match arg(&args, "--config") {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => default_config()?,
    });

    // the endpoint prepares the shadow tables the seed writes go through
    let mut server = ServerEndpoint::new(config.clone(), open_store(arg(&args, "--server"))?)?;
    seed_server(server.storage_mut(), rows)?;
    let mut client = open_store(arg(&args, "--client"))?;

    let mut agent = SyncAgent::new(config)
        .with_conflict_listener(merge_notes)
        .with_progress_listener(LogProgress);

    let report = agent.synchronize(&mut client, &mut server)?;
    print_report("initial sync", &report)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let client_edits = random_edits(&mut client, &mut rng, rows, edits, "client")?;
    let server_edits = random_edits(server.storage_mut(), &mut rng, rows, edits, "server")?;
    server
        .storage_mut()
        .update_row("catalog", &PrimaryKey::text("plum"), &Row::new().with("sku", "plum").with("price", 75))?;
    info!("made {} client edits and {} server edits", client_edits, server_edits);

    let report = agent.synchronize(&mut client, &mut server)?;
    print_report("after edits", &report)?;

    let report = agent.synchronize(&mut client, &mut server)?;
    print_report("quiet sync", &report)?;

    Ok(())
}
