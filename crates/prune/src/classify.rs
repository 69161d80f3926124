//! Checkpoint classification
//!
//! Checkpoints never reach the retention rules. Only the single newest
//! candidate may survive as a checkpoint; every other checkpoint is pruned.

use crate::decision::Verdict;
use darc_core::ArchiveRecord;
use std::cmp::Ordering;

/// A candidate archive tagged by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    Checkpoint(&'a ArchiveRecord),
    Regular(&'a ArchiveRecord),
}

impl<'a> Candidate<'a> {
    pub fn tag(record: &'a ArchiveRecord) -> Self {
        if record.is_checkpoint() {
            Candidate::Checkpoint(record)
        } else {
            Candidate::Regular(record)
        }
    }

    pub fn record(&self) -> &'a ArchiveRecord {
        match self {
            Candidate::Checkpoint(record) | Candidate::Regular(record) => record,
        }
    }

    /// Total order over mixed kinds, newest first
    pub fn newest_first(&self, other: &Candidate<'_>) -> Ordering {
        newest_first(self.record(), other.record())
    }
}

/// Later timestamp first; equal timestamps fall back to later creation
pub fn newest_first(a: &ArchiveRecord, b: &ArchiveRecord) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.seq.cmp(&a.seq))
}

/// Output of checkpoint classification
#[derive(Debug, Default)]
pub struct Classified<'a> {
    /// Verdict for every checkpoint, newest first
    pub checkpoints: Vec<(&'a ArchiveRecord, Verdict)>,
    /// Regular archives, newest first, for the retention rules
    pub regular: Vec<&'a ArchiveRecord>,
}

pub fn classify<'a>(candidates: &[&'a ArchiveRecord]) -> Classified<'a> {
    let mut tagged: Vec<Candidate<'a>> = candidates.iter().copied().map(Candidate::tag).collect();
    tagged.sort_by(|a, b| a.newest_first(b));

    let mut classified = Classified::default();
    for (position, candidate) in tagged.into_iter().enumerate() {
        match candidate {
            Candidate::Checkpoint(record) => {
                let verdict = if position == 0 {
                    Verdict::KeepCheckpointLatest
                } else {
                    Verdict::Prune
                };
                classified.checkpoints.push((record, verdict));
            }
            Candidate::Regular(record) => classified.regular.push(record),
        }
    }
    classified
}
