use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hasher::HashMode;
use crate::strategy::{ConflictStrategy, TableSyncStrategy};

pub const DEFAULT_METADATA_SUFFIX: &str = "_sync_md";

/// A synchronized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Key columns in declaration order.
    pub primary_key: Vec<String>,
    /// Falls back to `SyncConfig::default_strategy` when unset.
    #[serde(default)]
    pub strategy: Option<TableSyncStrategy>,
}

impl TableConfig {
    pub fn new(name: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: vec![primary_key.to_string()],
            strategy: None,
        }
    }

    pub fn with_composite_key(name: &str, primary_key: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: TableSyncStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Attempt budgets for the operations that may hit transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub get_changes: u32,
    pub apply_changes: u32,
    pub sync: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { get_changes: 3, apply_changes: 3, sync: 3 }
    }
}

/// Session configuration, built once and shared by reference with the agent,
/// the server endpoint and the engine components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub default_strategy: TableSyncStrategy,
    pub tables: Vec<TableConfig>,
    pub metadata_suffix: String,
    pub retry: RetryPolicy,
    pub hash_mode: HashMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_strategy: TableSyncStrategy::default(),
            tables: Vec::new(),
            metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            retry: RetryPolicy::default(),
            hash_mode: HashMode::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_table(mut self, table: TableConfig) -> Self {
        self.tables.push(table);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_suffix.is_empty() {
            return Err(Error::Config("metadata suffix must not be empty".into()));
        }
        if self.retry.get_changes == 0 || self.retry.apply_changes == 0 || self.retry.sync == 0 {
            return Err(Error::Config("retry budgets must allow at least one attempt".into()));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(Error::Config("table name must not be empty".into()));
            }
            if table.primary_key.is_empty() {
                return Err(Error::Config(format!("table {} declares no primary key", table.name)));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(Error::Config(format!("table {} configured twice", table.name)));
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Strategy for a table, falling back to the global default.
    pub fn strategy_for(&self, table: &str) -> TableSyncStrategy {
        self.table(table)
            .and_then(|t| t.strategy)
            .unwrap_or(self.default_strategy)
    }

    /// Tables whose conflicts are handed to a listener.
    pub fn fire_event_tables(&self) -> impl Iterator<Item = &TableConfig> {
        self.tables
            .iter()
            .filter(move |t| self.strategy_for(&t.name).strategy() == ConflictStrategy::FireEvent)
    }

    pub fn metadata_table(&self, table: &str) -> String {
        format!("{}{}", table, self.metadata_suffix)
    }
}
