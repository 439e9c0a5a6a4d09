//! Client-side orchestration of one sync session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::applier::ChangeApplier;
use crate::config::SyncConfig;
use crate::differ::TableDiffer;
use crate::endpoint::RemoteEndpoint;
use crate::error::{Error, Result};
use crate::matcher::match_changes;
use crate::metadata::{Revision, ShadowStore};
use crate::resolver::{ConflictListener, ConflictResolver};
use crate::storage::{in_transaction, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    FetchingRemote,
    LocalDiff,
    Resolving,
    ApplyingLocal,
    ApplyingRemote,
    RevisionUpdate,
    Done,
}

/// Receives progress messages before fetching, before pushing, and once
/// when `synchronize` returns.
pub trait ProgressListener {
    fn on_progress(&self, message: &str);
    fn on_finished(&self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub local_changes: usize,
    pub applied_local: usize,
    pub pushed: usize,
    pub acknowledged: usize,
    pub discarded: usize,
    pub conflicts: usize,
    pub attempts: u32,
    /// Revision the client stored at the end of the session.
    pub revision: Revision,
}

pub struct SyncAgent {
    config: Arc<SyncConfig>,
    conflict_listener: Option<Box<dyn ConflictListener>>,
    progress_listener: Option<Box<dyn ProgressListener>>,
    differ: TableDiffer,
    applier: ChangeApplier,
    phase: SyncPhase,
}

impl SyncAgent {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            differ: TableDiffer::new(config.hash_mode),
            applier: ChangeApplier::new(config.hash_mode),
            config,
            conflict_listener: None,
            progress_listener: None,
            phase: SyncPhase::Idle,
        }
    }

    pub fn with_conflict_listener(mut self, listener: impl ConflictListener + 'static) -> Self {
        self.conflict_listener = Some(Box::new(listener));
        self
    }

    pub fn with_progress_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.progress_listener = Some(Box::new(listener));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Runs one session between `local` and `remote`.
    ///
    /// The cycle restarts from the top when the server reports a recoverable
    /// status or a transient error escapes an operation's own retries, up to
    /// `retry.sync` attempts. Configuration errors are returned before any
    /// data is read.
    pub fn synchronize<S, R>(&mut self, local: &mut S, remote: &mut R) -> Result<SyncReport>
    where
        S: Storage,
        R: RemoteEndpoint,
    {
        self.phase = SyncPhase::Idle;
        let result = self.prepare(local).and_then(|_| self.run_with_retries(local, remote));
        if let Some(listener) = &self.progress_listener {
            listener.on_finished();
        }
        result
    }

    fn prepare<S: Storage>(&self, local: &mut S) -> Result<()> {
        self.config.validate()?;
        ConflictResolver::new(&self.config, self.conflict_listener.as_deref()).check_listener()?;
        for table in &self.config.tables {
            local.prepare_table(table, &self.config.metadata_suffix)?;
        }
        Ok(())
    }

    fn run_with_retries<S, R>(&mut self, local: &mut S, remote: &mut R) -> Result<SyncReport>
    where
        S: Storage,
        R: RemoteEndpoint,
    {
        let budget = self.config.retry.sync;
        let mut last_status = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.run_cycle(local, remote) {
                Ok(mut report) => {
                    report.attempts = attempt;
                    self.enter(SyncPhase::Done);
                    info!(
                        "sync finished at revision {} after {} attempt(s): {} pulled, {} pushed",
                        report.revision, attempt, report.applied_local, report.pushed
                    );
                    return Ok(report);
                }
                Err(e) => {
                    if e.server_status().is_some() {
                        last_status = e.server_status();
                    }
                    let retryable = e.recoverable_status().is_some() || e.is_transient();
                    if retryable && attempt < budget {
                        warn!("sync attempt {}/{} failed, restarting: {}", attempt, budget, e);
                        continue;
                    }

                    self.phase = SyncPhase::Idle;
                    return Err(if e.is_config() {
                        e
                    } else {
                        Error::SyncFailed { attempts: attempt, status: last_status, source: Box::new(e) }
                    });
                }
            }
        }
    }

    fn run_cycle<S, R>(&mut self, local: &mut S, remote: &mut R) -> Result<SyncReport>
    where
        S: Storage,
        R: RemoteEndpoint,
    {
        let retry = self.config.retry;
        let mut report = SyncReport::default();

        self.enter(SyncPhase::FetchingRemote);
        self.progress("fetching remote changes");
        let since = local.load_revision()?;
        let server = with_retries("get changes", retry.get_changes, || remote.fetch_changes(since))?;
        report.fetched = server.changes.len();

        self.enter(SyncPhase::LocalDiff);
        let local_changes = with_retries("get changes", retry.get_changes, || {
            self.differ.diff_all(local, &self.config.tables)
        })?;
        report.local_changes = local_changes.len();

        self.enter(SyncPhase::Resolving);
        let matched = match_changes(local_changes, server.changes);
        let plan = ConflictResolver::new(&self.config, self.conflict_listener.as_deref())
            .resolve(matched)?;
        report.conflicts = plan.conflicts;
        report.discarded = plan.discarded.len();

        self.enter(SyncPhase::ApplyingLocal);
        let applied = with_retries("apply changes", retry.apply_changes, || {
            self.applier.apply_batch(local, &plan.apply_to_local)
        })?;
        report.applied_local = applied.len();

        self.enter(SyncPhase::ApplyingRemote);
        self.progress(&format!("pushing {} local changes", plan.apply_to_remote.len()));
        let revision = with_retries("apply changes", retry.apply_changes, || {
            remote.push_changes(server.revision, &plan.apply_to_remote)
        })?;
        report.pushed = plan.apply_to_remote.len();

        self.enter(SyncPhase::RevisionUpdate);
        in_transaction(local, |s| {
            let mut shadow = ShadowStore::new(s);
            for change in &plan.apply_to_remote {
                shadow.update_revision(change.table(), change.primary_key(), revision)?;
            }
            for ack in &plan.acknowledged {
                shadow.update_revision(&ack.table, &ack.primary_key, ack.revision)?;
            }
            s.store_revision(revision)
        })?;
        report.acknowledged = plan.acknowledged.len();
        report.revision = revision;

        Ok(report)
    }

    fn enter(&mut self, phase: SyncPhase) {
        debug!("sync phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn progress(&self, message: &str) {
        if let Some(listener) = &self.progress_listener {
            listener.on_progress(message);
        }
    }
}

/// Retries `op` on transient storage errors, up to `budget` attempts.
fn with_retries<T>(operation: &str, budget: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < budget => {
                warn!("{} attempt {}/{} failed: {}", operation, attempt, budget, e);
                attempt += 1;
            }
            other => return other,
        }
    }
}
