//! Retention rule engine
//!
//! Rules run in a fixed order:
//! 1. keep-within keeps everything inside the window
//! 2. bucketed rules, secondly through yearly, each keeping the newest
//!    still-pending archive of every bucket until its count is used up
//! 3. whatever is still pending is pruned
//!
//! An archive kept by one step is invisible to every later step, which is
//! what thins out history as it ages.

use crate::decision::{KeepReason, Verdict};
use crate::policy::{Granularity, Limit, RetentionPolicy};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use darc_core::ArchiveRecord;
use std::collections::HashSet;

/// A timestamp truncated to a rule's granularity, in the engine's time zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKey {
    /// Secondly, minutely and hourly buckets
    Instant(NaiveDateTime),
    Day(NaiveDate),
    /// ISO week (Monday through Sunday)
    Week { year: i32, week: u32 },
    /// Calendar month
    Month { year: i32, month: u32 },
    Year(i32),
}

pub fn bucket_key<Tz: TimeZone>(timestamp: &DateTime<Utc>, granularity: Granularity, tz: &Tz) -> BucketKey {
    let local = timestamp.with_timezone(tz).naive_local();
    let date = local.date();
    let truncate = |hour: u32, minute: u32, second: u32| {
        BucketKey::Instant(date.and_hms_opt(hour, minute, second).unwrap_or(local))
    };

    match granularity {
        Granularity::Secondly => truncate(local.hour(), local.minute(), local.second()),
        Granularity::Minutely => truncate(local.hour(), local.minute(), 0),
        Granularity::Hourly => truncate(local.hour(), 0, 0),
        Granularity::Daily => BucketKey::Day(date),
        Granularity::Weekly => {
            let week = date.iso_week();
            BucketKey::Week {
                year: week.year(),
                week: week.week(),
            }
        }
        Granularity::Monthly => BucketKey::Month {
            year: date.year(),
            month: date.month(),
        },
        Granularity::Yearly => BucketKey::Year(date.year()),
    }
}

/// Applies a retention policy to regular (non-checkpoint) archives
pub struct RetentionEngine<'a, Tz: TimeZone> {
    policy: &'a RetentionPolicy,
    tz: &'a Tz,
}

impl<'a, Tz: TimeZone> RetentionEngine<'a, Tz> {
    pub fn new(policy: &'a RetentionPolicy, tz: &'a Tz) -> Self {
        Self { policy, tz }
    }

    /// Decide every archive; `archives` must be sorted newest first
    ///
    /// Returns one verdict per input archive, in input order.
    pub fn decide(&self, archives: &[&ArchiveRecord], reference: DateTime<Utc>) -> Vec<Verdict> {
        let mut verdicts: Vec<Option<Verdict>> = vec![None; archives.len()];

        if let Some(within) = self.policy.within() {
            for (slot, archive) in verdicts.iter_mut().zip(archives) {
                if within.contains(&archive.timestamp, reference) {
                    *slot = Some(Verdict::Keep(KeepReason::Within));
                }
            }
        }

        for rule in self.policy.rules() {
            let mut buckets: HashSet<BucketKey> = HashSet::new();
            for (slot, archive) in verdicts.iter_mut().zip(archives) {
                if let Limit::Count(n) = rule.limit {
                    if buckets.len() >= n {
                        break;
                    }
                }
                if slot.is_some() {
                    continue;
                }

                let key = bucket_key(&archive.timestamp, rule.granularity, self.tz);
                if buckets.insert(key) {
                    *slot = Some(Verdict::Keep(KeepReason::Rule {
                        granularity: rule.granularity,
                        ordinal: buckets.len(),
                    }));
                }
            }
            tracing::debug!(rule = %rule.granularity, kept = buckets.len(), "applied retention rule");
        }

        verdicts
            .into_iter()
            .map(|verdict| verdict.unwrap_or(Verdict::Prune))
            .collect()
    }
}
