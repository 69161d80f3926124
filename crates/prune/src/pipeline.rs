//! One prune run from start to finish
//!
//! Lock, snapshot the catalog, decide, execute, commit, unlock. The lock is
//! held for the whole span so the snapshot cannot go stale.

use crate::decision::{Decision, DecisionEntry};
use crate::error::PruneError;
use crate::executor::{ArchiveOutcome, DeletionExecutor, ExecuteOptions, ExecutionReport};
use crate::policy::{PruneOptions, RetentionPolicy};
use crate::report::PruneStats;
use chrono::{DateTime, TimeZone, Utc};
use darc_core::Repository;

/// Validated input for a prune run
#[derive(Debug, Clone)]
pub struct PruneRequest {
    pub prefix: Option<String>,
    pub policy: RetentionPolicy,
    pub execute: ExecuteOptions,
}

impl PruneRequest {
    /// Validate options; fails before any repository access
    pub fn from_options(options: &PruneOptions, execute: ExecuteOptions) -> Result<Self, PruneError> {
        let policy = RetentionPolicy::from_options(options)?;
        let prefix = options.prefix.clone().filter(|p| !p.is_empty());
        Ok(Self {
            prefix,
            policy,
            execute,
        })
    }
}

/// Callbacks during a run
pub trait PruneObserver {
    /// The decision is known, nothing has been deleted yet
    fn planned(&mut self, _decision: &Decision) {}

    /// One pruned archive has been handled
    fn archive_done(&mut self, _entry: &DecisionEntry, _outcome: &ArchiveOutcome) {}
}

impl PruneObserver for () {}

#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub decision: Decision,
    pub execution: ExecutionReport,
}

impl PruneOutcome {
    pub fn stats(&self) -> PruneStats {
        PruneStats::collect(&self.decision, Some(&self.execution))
    }

    pub fn has_failures(&self) -> bool {
        self.execution.has_failures()
    }
}

/// Run a full prune against `repo`
///
/// `reference` anchors keep-within; `tz` is the zone bucket keys are computed in.
pub fn run<R, Tz>(
    repo: &R,
    request: &PruneRequest,
    reference: DateTime<Utc>,
    tz: &Tz,
    observer: &mut dyn PruneObserver,
) -> Result<PruneOutcome, PruneError>
where
    R: Repository,
    Tz: TimeZone,
{
    let lock = repo.acquire_exclusive_lock().map_err(PruneError::from_lock)?;

    let catalog = repo.list_archives()?;
    let decision = Decision::compute(
        &catalog,
        request.prefix.as_deref(),
        &request.policy,
        reference,
        tz,
    );
    tracing::info!(
        archives = catalog.len(),
        candidates = decision.len(),
        prune = decision.pruned().count(),
        dry_run = request.execute.dry_run,
        "computed prune decision"
    );
    observer.planned(&decision);

    let execution = DeletionExecutor::new(repo, request.execute)
        .execute(&decision, &mut |entry, outcome| observer.archive_done(entry, outcome))?;

    drop(lock);
    Ok(PruneOutcome {
        decision,
        execution,
    })
}
