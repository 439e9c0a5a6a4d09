//! The server side of a sync session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::applier::ChangeApplier;
use crate::config::SyncConfig;
use crate::differ::TableDiffer;
use crate::error::{Error, Result, ServerStatus};
use crate::metadata::{Change, Revision, ShadowStore};
use crate::storage::{in_transaction, Storage};

/// Changes the server holds past a client's revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerChanges {
    /// Server revision the change set was taken at.
    pub revision: Revision,
    pub changes: Vec<Change>,
}

/// What a client needs from its server. Implementations are free to cross a
/// process boundary; `Change` and `ServerChanges` serialize with serde.
pub trait RemoteEndpoint {
    /// Fails with `ServerStatus::UnknownRevision` when `since` was never issued.
    fn fetch_changes(&mut self, since: Revision) -> Result<ServerChanges>;

    /// Applies `changes` on top of `base_revision` and returns the server's
    /// new revision. Fails with `ServerStatus::StaleRevision` when the server
    /// moved past `base_revision`.
    fn push_changes(&mut self, base_revision: Revision, changes: &[Change]) -> Result<Revision>;
}

/// In-process server over any storage. Direct edits to the server's tables
/// are picked up and stamped with a fresh revision on every request.
pub struct ServerEndpoint<S: Storage> {
    config: Arc<SyncConfig>,
    storage: S,
    differ: TableDiffer,
    applier: ChangeApplier,
}

impl<S: Storage> ServerEndpoint<S> {
    pub fn new(config: Arc<SyncConfig>, mut storage: S) -> Result<Self> {
        config.validate()?;
        for table in &config.tables {
            storage.prepare_table(table, &config.metadata_suffix)?;
        }
        Ok(Self {
            differ: TableDiffer::new(config.hash_mode),
            applier: ChangeApplier::new(config.hash_mode),
            config,
            storage,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    pub fn revision(&self) -> Result<Revision> {
        self.storage.load_revision()
    }

    /// Stamps the server's own pending edits with the next revision and
    /// returns the current revision.
    pub fn capture_local_changes(&mut self) -> Result<Revision> {
        let changes = self.differ.diff_all(&mut self.storage, &self.config.tables)?;
        let current = self.storage.load_revision()?;
        if changes.is_empty() {
            return Ok(current);
        }

        let revision = current + 1;
        in_transaction(&mut self.storage, |s| {
            let mut shadow = ShadowStore::new(s);
            for change in &changes {
                shadow.update_revision(change.table(), change.primary_key(), revision)?;
            }
            s.store_revision(revision)
        })?;
        info!("captured {} server edits at revision {}", changes.len(), revision);
        Ok(revision)
    }

    fn check_push(&self, change: &Change) -> Result<()> {
        if self.config.table(change.table()).is_none() {
            return Err(Error::Protocol(format!("push for unknown table {}", change.table())));
        }
        let direction = self.config.strategy_for(change.table()).direction();
        if !direction.client_may_send() {
            return Err(Error::server(
                ServerStatus::DirectionViolation,
                format!("{} is {}", change.table(), direction),
            ));
        }
        Ok(())
    }
}

impl<S: Storage> RemoteEndpoint for ServerEndpoint<S> {
    fn fetch_changes(&mut self, since: Revision) -> Result<ServerChanges> {
        let revision = self.capture_local_changes()?;
        if since > revision {
            return Err(Error::server(
                ServerStatus::UnknownRevision,
                format!("revision {} is ahead of server revision {}", since, revision),
            ));
        }

        let mut changes = Vec::new();
        for table in &self.config.tables {
            if !self.config.strategy_for(&table.name).direction().server_may_send() {
                continue;
            }
            for (row, entry) in self.storage.changes_since(&table.name, since)? {
                changes.push(Change::new(entry, row));
            }
        }
        changes.sort_by(Change::cmp_key);

        debug!("serving {} changes since {} at {}", changes.len(), since, revision);
        Ok(ServerChanges { revision, changes })
    }

    fn push_changes(&mut self, base_revision: Revision, changes: &[Change]) -> Result<Revision> {
        let current = self.capture_local_changes()?;
        if base_revision != current {
            return Err(Error::server(
                ServerStatus::StaleRevision,
                format!("client based on {}, server is at {}", base_revision, current),
            ));
        }
        if changes.is_empty() {
            return Ok(current);
        }
        for change in changes {
            self.check_push(change)?;
        }

        let revision = current + 1;
        let applier = &self.applier;
        in_transaction(&mut self.storage, |s| {
            for change in changes {
                applier.apply(s, change, revision)?;
            }
            s.store_revision(revision)
        })
        .map_err(|e| match e {
            Error::Integrity(message) => Error::server(ServerStatus::DuplicateEntry, message),
            other => other,
        })?;

        info!("accepted {} client changes at revision {}", changes.len(), revision);
        Ok(revision)
    }
}
