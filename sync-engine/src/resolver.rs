//! Per-table conflict resolution over a matched change set.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::hasher::{RowHasher, TRIGGER_HASH};
use crate::matcher::MatchResult;
use crate::metadata::{Change, Flag, MetadataEntry, Revision};
use crate::row::{PrimaryKey, Row};
use crate::strategy::ConflictStrategy;

/// Outcome chosen by a `ConflictListener`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictDecision {
    KeepServer,
    KeepClient,
    /// A new row written to both sides.
    Merged(Row),
}

/// Decides conflicts for tables configured with `FIRE_EVENT`. A `None`
/// row means that side deleted it.
pub trait ConflictListener {
    fn resolve(
        &self,
        table: &str,
        pk: &PrimaryKey,
        server_row: Option<&Row>,
        client_row: Option<&Row>,
    ) -> ConflictDecision;
}

impl<F> ConflictListener for F
where
    F: Fn(&str, &PrimaryKey, Option<&Row>, Option<&Row>) -> ConflictDecision,
{
    fn resolve(
        &self,
        table: &str,
        pk: &PrimaryKey,
        server_row: Option<&Row>,
        client_row: Option<&Row>,
    ) -> ConflictDecision {
        self(table, pk, server_row, client_row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    ClientWins,
    ServerWins,
    /// Overridden by a listener decision or merge.
    Listener,
    /// The client may not send changes for this table.
    DirectionGated,
    /// The local change was made on top of this remote version.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discarded {
    pub change: Change,
    pub reason: DiscardReason,
}

/// A local entry to mark processed without touching its data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub table: String,
    pub primary_key: PrimaryKey,
    pub revision: Revision,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionPlan {
    pub apply_to_local: Vec<Change>,
    pub apply_to_remote: Vec<Change>,
    pub acknowledged: Vec<Acknowledgement>,
    pub discarded: Vec<Discarded>,
    /// Pairs whose content actually differed.
    pub conflicts: usize,
}

impl ResolutionPlan {
    fn acknowledge(&mut self, change: &Change, revision: Revision) {
        self.acknowledged.push(Acknowledgement {
            table: change.table().to_string(),
            primary_key: change.primary_key().clone(),
            revision,
        });
    }

    fn discard(&mut self, change: Change, reason: DiscardReason) {
        self.discarded.push(Discarded { change, reason });
    }

    fn server_wins(&mut self, local: Change, remote: Change, reason: DiscardReason) {
        self.apply_to_local.push(settled(remote));
        self.discard(local, reason);
    }

    fn client_wins(&mut self, local: Change, remote: Change, reason: DiscardReason) {
        self.apply_to_remote.push(local);
        self.discard(remote, reason);
    }
}

// Incoming rows are written as processed unless the plan says otherwise.
fn settled(mut change: Change) -> Change {
    change.entry.flag = Flag::Processed;
    change
}

// Both deleted, or the same content hash. Trigger stamps carry no content.
fn same_content(local: &Change, remote: &Change) -> bool {
    match (&local.entry.hash, &remote.entry.hash) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b && a != TRIGGER_HASH,
        _ => false,
    }
}

pub struct ConflictResolver<'a> {
    config: &'a SyncConfig,
    listener: Option<&'a dyn ConflictListener>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(config: &'a SyncConfig, listener: Option<&'a dyn ConflictListener>) -> Self {
        Self { config, listener }
    }

    /// Fails when any `FIRE_EVENT` table lacks a listener.
    pub fn check_listener(&self) -> Result<()> {
        if self.listener.is_none() {
            if let Some(table) = self.config.fire_event_tables().next() {
                return Err(Error::MissingListener { table: table.name.clone() });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, matched: MatchResult) -> Result<ResolutionPlan> {
        let mut plan = ResolutionPlan::default();

        for remote in matched.unmatched_remote {
            self.check_remote(&remote)?;
            plan.apply_to_local.push(settled(remote));
        }

        for local in matched.unmatched_local {
            if self.config.strategy_for(local.table()).direction().client_may_send() {
                plan.apply_to_remote.push(local);
            } else {
                plan.acknowledge(&local, local.revision());
                plan.discard(local, DiscardReason::DirectionGated);
            }
        }

        for (local, remote) in matched.pairs {
            self.check_remote(&remote)?;
            if same_content(&local, &remote) {
                plan.acknowledge(&local, remote.revision());
                continue;
            }

            // A merge applied by an earlier attempt that never reached the server.
            let table_strategy = self.config.strategy_for(local.table());
            if local.revision() >= remote.revision() && table_strategy.direction().client_may_send() {
                debug!("{}[{}] already incorporates revision {}", local.table(), local.primary_key(), remote.revision());
                plan.client_wins(local, remote, DiscardReason::Superseded);
                continue;
            }

            plan.conflicts += 1;
            let strategy = table_strategy.strategy();
            debug!("conflict on {}[{}] resolved by {}", local.table(), local.primary_key(), strategy);

            match strategy {
                ConflictStrategy::ClientWins => {
                    plan.client_wins(local, remote, DiscardReason::ClientWins)
                }
                ConflictStrategy::ServerWins => {
                    plan.server_wins(local, remote, DiscardReason::ServerWins)
                }
                ConflictStrategy::FireEvent => self.fire_event(&mut plan, local, remote)?,
            }
        }

        Ok(plan)
    }

    fn check_remote(&self, remote: &Change) -> Result<()> {
        let direction = self.config.strategy_for(remote.table()).direction();
        if !direction.server_may_send() {
            return Err(Error::Protocol(format!(
                "server sent {}[{}] for {} table",
                remote.table(),
                remote.primary_key(),
                direction
            )));
        }
        Ok(())
    }

    fn fire_event(&self, plan: &mut ResolutionPlan, local: Change, remote: Change) -> Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| Error::MissingListener { table: local.table().to_string() })?;

        let decision = listener.resolve(
            local.table(),
            local.primary_key(),
            remote.row.as_ref(),
            local.row.as_ref(),
        );

        match decision {
            ConflictDecision::KeepServer => plan.server_wins(local, remote, DiscardReason::Listener),
            ConflictDecision::KeepClient => plan.client_wins(local, remote, DiscardReason::Listener),
            ConflictDecision::Merged(row) => {
                let hash = RowHasher::new(self.config.hash_mode).hash(&row);
                let row = hash.as_ref().map(|_| row);

                // Stays pending locally until the push is acknowledged.
                let to_local = MetadataEntry {
                    hash: hash.clone(),
                    flag: Flag::Modified,
                    ..remote.entry.clone()
                };
                let to_remote = MetadataEntry { hash, flag: Flag::Modified, ..local.entry.clone() };

                plan.apply_to_local.push(Change::new(to_local, row.clone()));
                plan.apply_to_remote.push(Change::new(to_remote, row));
                plan.discard(remote, DiscardReason::Listener);
            }
        }
        Ok(())
    }
}
