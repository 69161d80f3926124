//! Deletion executor
//!
//! Commits a `Decision` against a repository. Deletions run one archive at a
//! time; each is atomic in the repository, so an interrupted run leaves only
//! whole deletions behind.

use crate::decision::{Decision, DecisionEntry};
use crate::error::PruneError;
use darc_core::{CommitStats, DeleteStats, Repository, RepositoryError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Report only, never mutate
    pub dry_run: bool,
    /// Delete archives whose metadata fails verification
    pub force: bool,
    /// Reclaim orphaned chunks during commit
    pub save_space: bool,
}

/// Final state of one archive after execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Kept,
    /// Dry run: would have been deleted
    WouldDelete,
    Deleted(DeleteStats),
    /// Corrupt metadata, deleted without releasing chunk references
    ForceDeleted,
    /// Corrupt metadata, left in place
    SkippedCorrupt,
    DeleteFailed(String),
}

impl ArchiveOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ArchiveOutcome::SkippedCorrupt | ArchiveOutcome::DeleteFailed(_)
        )
    }
}

/// Outcome of every decided archive, in decision order
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<ArchiveOutcome>,
    /// Chunk accounting summed over all deletions
    pub released: DeleteStats,
    pub commit: CommitStats,
    pub dry_run: bool,
}

impl ExecutionReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }
}

pub struct DeletionExecutor<'r, R: Repository> {
    repo: &'r R,
    options: ExecuteOptions,
}

impl<'r, R: Repository> DeletionExecutor<'r, R> {
    pub fn new(repo: &'r R, options: ExecuteOptions) -> Self {
        Self { repo, options }
    }

    /// Apply `decision`; `progress` is called after each pruned archive
    ///
    /// Per-archive failures are recorded, not returned. Only a failed
    /// commit aborts.
    pub fn execute(
        &self,
        decision: &Decision,
        progress: &mut dyn FnMut(&DecisionEntry, &ArchiveOutcome),
    ) -> Result<ExecutionReport, PruneError> {
        let mut report = ExecutionReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        for entry in decision.entries() {
            if entry.verdict.is_keep() {
                report.outcomes.push(ArchiveOutcome::Kept);
                continue;
            }

            let outcome = if self.options.dry_run {
                ArchiveOutcome::WouldDelete
            } else {
                self.delete_one(entry)
            };
            if let ArchiveOutcome::Deleted(stats) = &outcome {
                report.released.merge(stats);
            }
            progress(entry, &outcome);
            report.outcomes.push(outcome);
        }

        if !self.options.dry_run {
            report.commit = self.repo.commit(self.options.save_space)?;
        }
        Ok(report)
    }

    fn delete_one(&self, entry: &DecisionEntry) -> ArchiveOutcome {
        let record = &entry.record;
        let id = &record.id;

        let verified = match self.repo.verify_archive_metadata(id) {
            Ok(verified) => verified,
            Err(e) => return self.failed(entry, e),
        };
        if !verified {
            return self.corrupt(entry);
        }

        match self.repo.delete_archive(id) {
            Ok(stats) => {
                tracing::info!(
                    archive = %record.name,
                    id = %id.short(),
                    released = stats.chunks_released,
                    orphaned = stats.chunks_orphaned,
                    "pruned archive"
                );
                ArchiveOutcome::Deleted(stats)
            }
            Err(RepositoryError::CorruptArchive(_)) => self.corrupt(entry),
            Err(e) => self.failed(entry, e),
        }
    }

    fn corrupt(&self, entry: &DecisionEntry) -> ArchiveOutcome {
        let record = &entry.record;
        if !self.options.force {
            tracing::error!(
                archive = %record.name,
                id = %record.id.short(),
                "archive metadata is corrupt; skipping (use --force to delete it anyway)"
            );
            return ArchiveOutcome::SkippedCorrupt;
        }

        match self.repo.force_delete_archive(&record.id) {
            Ok(()) => {
                tracing::warn!(
                    archive = %record.name,
                    id = %record.id.short(),
                    "force-deleted corrupt archive; referenced chunks were not released"
                );
                ArchiveOutcome::ForceDeleted
            }
            Err(e) => self.failed(entry, e),
        }
    }

    fn failed(&self, entry: &DecisionEntry, err: RepositoryError) -> ArchiveOutcome {
        tracing::error!(archive = %entry.record.name, error = %err, "failed to delete archive");
        ArchiveOutcome::DeleteFailed(err.to_string())
    }
}
