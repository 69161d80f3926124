//! Keep/prune decisions for one run

use crate::classify::{classify, newest_first};
use crate::engine::RetentionEngine;
use crate::partition::filter_by_prefix;
use crate::policy::{Granularity, RetentionPolicy};
use chrono::{DateTime, TimeZone, Utc};
use darc_core::{ArchiveRecord, ObjectId};
use std::collections::HashMap;
use std::fmt;

/// Why an archive was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// Inside the keep-within window
    Within,
    /// Newest archive of the `ordinal`-th bucket filled by a rule
    Rule { granularity: Granularity, ordinal: usize },
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::Within => f.write_str("within"),
            KeepReason::Rule {
                granularity,
                ordinal,
            } => write!(f, "{granularity} #{ordinal}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep(KeepReason),
    /// The newest candidate is a checkpoint
    KeepCheckpointLatest,
    Prune,
}

impl Verdict {
    pub fn is_keep(&self) -> bool {
        !self.is_prune()
    }

    pub fn is_prune(&self) -> bool {
        matches!(self, Verdict::Prune)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEntry {
    pub record: ArchiveRecord,
    pub verdict: Verdict,
}

/// Verdict for every candidate archive, newest first
///
/// Archives outside the prefix are absent entirely.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    entries: Vec<DecisionEntry>,
    index: HashMap<ObjectId, usize>,
}

impl Decision {
    /// Partition, classify and apply the retention rules
    ///
    /// Pure: depends only on the arguments. Bucket keys are computed in `tz`.
    pub fn compute<Tz: TimeZone>(
        catalog: &[ArchiveRecord],
        prefix: Option<&str>,
        policy: &RetentionPolicy,
        reference: DateTime<Utc>,
        tz: &Tz,
    ) -> Decision {
        let candidates = filter_by_prefix(catalog, prefix);
        let classified = classify(&candidates);
        let verdicts = RetentionEngine::new(policy, tz).decide(&classified.regular, reference);

        let mut entries: Vec<DecisionEntry> = classified
            .checkpoints
            .into_iter()
            .chain(classified.regular.into_iter().zip(verdicts))
            .map(|(record, verdict)| DecisionEntry {
                record: record.clone(),
                verdict,
            })
            .collect();
        entries.sort_by(|a, b| newest_first(&a.record, &b.record));

        Decision::from_entries(entries)
    }

    fn from_entries(entries: Vec<DecisionEntry>) -> Decision {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.record.id, i))
            .collect();
        Decision { entries, index }
    }

    pub fn entries(&self) -> &[DecisionEntry] {
        &self.entries
    }

    pub fn verdict(&self, id: &ObjectId) -> Option<Verdict> {
        self.index.get(id).map(|&i| self.entries[i].verdict)
    }

    pub fn kept(&self) -> impl Iterator<Item = &DecisionEntry> {
        self.entries.iter().filter(|e| e.verdict.is_keep())
    }

    pub fn pruned(&self) -> impl Iterator<Item = &DecisionEntry> {
        self.entries.iter().filter(|e| e.verdict.is_prune())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
