//! Hash-based, bidirectional table synchronization between a client store
//! and a server store that share no transaction log.
//!
//! Every synchronized table has a shadow metadata table holding a content
//! hash, a revision and a flag per row. A sync session diffs the client
//! against its shadow, matches the result against the server's change feed,
//! resolves conflicts per table and applies both directions.

mod agent;
mod applier;
mod config;
mod differ;
mod endpoint;
mod error;
mod hasher;
mod matcher;
mod metadata;
mod resolver;
mod row;
mod storage;
mod strategy;

pub use agent::{ProgressListener, SyncAgent, SyncPhase, SyncReport};
pub use applier::{ApplyOutcome, ChangeApplier};
pub use config::{RetryPolicy, SyncConfig, TableConfig, DEFAULT_METADATA_SUFFIX};
pub use differ::TableDiffer;
pub use endpoint::{RemoteEndpoint, ServerChanges, ServerEndpoint};
pub use error::{Error, Result, ServerStatus};
pub use hasher::{HashAlgorithm, HashMode, RowHasher, TRIGGER_HASH};
pub use matcher::{match_changes, MatchResult};
pub use metadata::{Change, Flag, MetadataEntry, Revision, ShadowStore, INITIAL_REVISION};
pub use resolver::{
    Acknowledgement, ConflictDecision, ConflictListener, ConflictResolver, DiscardReason,
    Discarded, ResolutionPlan,
};
pub use row::{KeyPart, PrimaryKey, Row, Value};
pub use storage::{in_transaction, MemoryStorage, RowStream, ShadowRow, Storage};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use strategy::{ConflictStrategy, SyncDirection, TableSyncStrategy};
