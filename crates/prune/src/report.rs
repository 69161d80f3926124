//! Decision reporting for `--list` and `--stats`

use crate::decision::{Decision, DecisionEntry, KeepReason, Verdict};
use crate::executor::{ArchiveOutcome, ExecutionReport};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt::Display;

/// One `--list` row
#[derive(Debug, Clone, Copy)]
pub struct ListingLine<'a> {
    pub entry: &'a DecisionEntry,
    /// None when the decision has not been executed
    pub outcome: Option<&'a ArchiveOutcome>,
}

impl ListingLine<'_> {
    pub fn label(&self) -> String {
        match (self.entry.verdict, self.outcome) {
            (Verdict::Keep(reason), _) => format!("Keeping archive (rule: {})", rule_label(reason)),
            (Verdict::KeepCheckpointLatest, _) => "Keeping checkpoint archive".to_string(),
            (Verdict::Prune, None | Some(ArchiveOutcome::WouldDelete | ArchiveOutcome::Kept)) => {
                "Would prune".to_string()
            }
            (Verdict::Prune, Some(ArchiveOutcome::Deleted(_))) => "Pruning archive".to_string(),
            (Verdict::Prune, Some(ArchiveOutcome::ForceDeleted)) => {
                "Force-pruned corrupt archive".to_string()
            }
            (Verdict::Prune, Some(ArchiveOutcome::SkippedCorrupt)) => {
                "Skipped corrupt archive".to_string()
            }
            (Verdict::Prune, Some(ArchiveOutcome::DeleteFailed(_))) => {
                "Failed to prune archive".to_string()
            }
        }
    }

    /// Full row: label, name, start time and short id
    pub fn render<Tz: TimeZone>(&self, reference: DateTime<Utc>, tz: &Tz) -> String
    where
        Tz::Offset: Display,
    {
        let record = &self.entry.record;
        let mut line = format!(
            "{:<36} {:<32} {} [{}]",
            format!("{}:", self.label()),
            record.name,
            format_time(&record.timestamp, reference, tz),
            record.id.short()
        );
        if let Some(ArchiveOutcome::DeleteFailed(err)) = self.outcome {
            line.push_str(&format!(" ({err})"));
        }
        line
    }
}

fn rule_label(reason: KeepReason) -> String {
    match reason {
        KeepReason::Within => "within".to_string(),
        rule => rule.to_string(),
    }
}

/// Listing rows in decision order (newest first)
pub fn listing<'a>(decision: &'a Decision, execution: Option<&'a ExecutionReport>) -> Vec<ListingLine<'a>> {
    decision
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| ListingLine {
            entry,
            outcome: execution.and_then(|report| report.outcomes.get(i)),
        })
        .collect()
}

/// Aggregate counts for `--stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub candidates: usize,
    pub kept: usize,
    pub kept_within: usize,
    pub kept_by_rule: usize,
    pub kept_checkpoint: usize,
    pub pruned: usize,
    pub deleted: usize,
    pub force_deleted: usize,
    pub skipped_corrupt: usize,
    pub failed: usize,
    pub chunks_released: u64,
    pub chunks_orphaned: u64,
    pub bytes_orphaned: u64,
    pub bytes_reclaimed: u64,
}

impl PruneStats {
    pub fn collect(decision: &Decision, execution: Option<&ExecutionReport>) -> Self {
        let mut stats = PruneStats {
            candidates: decision.len(),
            ..Default::default()
        };

        for entry in decision.entries() {
            match entry.verdict {
                Verdict::Keep(KeepReason::Within) => stats.kept_within += 1,
                Verdict::Keep(KeepReason::Rule { .. }) => stats.kept_by_rule += 1,
                Verdict::KeepCheckpointLatest => stats.kept_checkpoint += 1,
                Verdict::Prune => stats.pruned += 1,
            }
        }
        stats.kept = stats.kept_within + stats.kept_by_rule + stats.kept_checkpoint;

        if let Some(report) = execution {
            for outcome in &report.outcomes {
                match outcome {
                    ArchiveOutcome::Deleted(_) => stats.deleted += 1,
                    ArchiveOutcome::ForceDeleted => stats.force_deleted += 1,
                    ArchiveOutcome::SkippedCorrupt => stats.skipped_corrupt += 1,
                    ArchiveOutcome::DeleteFailed(_) => stats.failed += 1,
                    ArchiveOutcome::Kept | ArchiveOutcome::WouldDelete => {}
                }
            }
            stats.chunks_released = report.released.chunks_released;
            stats.chunks_orphaned = report.released.chunks_orphaned;
            stats.bytes_orphaned = report.released.bytes_orphaned;
            stats.bytes_reclaimed = report.commit.bytes_reclaimed;
        }
        stats
    }

    /// Human-readable summary lines
    pub fn lines(&self, dry_run: bool) -> Vec<String> {
        let mut lines = vec![
            format!("Archives considered: {}", self.candidates),
            format!(
                "Kept:                {} (within: {}, rules: {}, checkpoint: {})",
                self.kept, self.kept_within, self.kept_by_rule, self.kept_checkpoint
            ),
        ];
        if dry_run {
            lines.push(format!("Would prune:         {}", self.pruned));
            return lines;
        }

        lines.push(format!("Pruned:              {}", self.deleted));
        if self.force_deleted > 0 {
            lines.push(format!("Force-pruned:        {}", self.force_deleted));
        }
        if self.skipped_corrupt > 0 {
            lines.push(format!("Skipped (corrupt):   {}", self.skipped_corrupt));
        }
        if self.failed > 0 {
            lines.push(format!("Failed:              {}", self.failed));
        }
        lines.push(format!(
            "Chunks released:     {} ({} unreferenced)",
            self.chunks_released, self.chunks_orphaned
        ));
        lines.push(format!("Space freed:         {}", format_size(self.bytes_orphaned)));
        if self.bytes_reclaimed > 0 {
            lines.push(format!("Space reclaimed now: {}", format_size(self.bytes_reclaimed)));
        }
        lines
    }
}

/// `Mon DD HH:MM` within a year of `reference`, `Mon DD  YYYY` beyond
pub fn format_time<Tz: TimeZone>(timestamp: &DateTime<Utc>, reference: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let local = timestamp.with_timezone(tz);
    if reference.signed_duration_since(*timestamp) < Duration::days(365) {
        local.format("%b %d %H:%M").to_string()
    } else {
        local.format("%b %d  %Y").to_string()
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
