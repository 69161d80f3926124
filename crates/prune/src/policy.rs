//! Retention rules and their validation
//!
//! A `RetentionPolicy` is the ordered list of enabled rules. Bucketed rules
//! are always held in granularity order (secondly first), so the engine can
//! simply walk them.

use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Bucket width of a bucketed rule, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    pub const ALL: [Granularity; 7] = [
        Granularity::Secondly,
        Granularity::Minutely,
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Yearly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Secondly => "secondly",
            Granularity::Minutely => "minutely",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Absolute "keep everything newer than" window
///
/// Units: `H` hour, `d` day, `w` week, `m` month (31 days), `y` year (365 days).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepWithin {
    text: String,
    duration: Duration,
}

impl KeepWithin {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidWithin {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let text = value.trim();
        let unit = text.chars().last().ok_or_else(|| invalid("empty value"))?;
        let digits = &text[..text.len() - unit.len_utf8()];

        let hours_per_unit: i64 = match unit {
            'H' => 1,
            'd' => 24,
            'w' => 24 * 7,
            'm' => 24 * 31,
            'y' => 24 * 365,
            _ => return Err(invalid("unit must be one of H, d, w, m, y")),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a number followed by a unit, e.g. 2d"));
        }
        let count: i64 = digits.parse().map_err(|_| invalid("number out of range"))?;
        if count == 0 {
            return Err(invalid("duration must be positive"));
        }

        let duration = count
            .checked_mul(hours_per_unit)
            .and_then(Duration::try_hours)
            .ok_or_else(|| invalid("number out of range"))?;

        Ok(Self {
            text: text.to_string(),
            duration,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Oldest instant still inside the window (exclusive)
    pub fn cutoff(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        reference
            .checked_sub_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        *timestamp > self.cutoff(reference)
    }
}

impl FromStr for KeepWithin {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeepWithin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How many buckets a rule may fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(usize),
    Unlimited,
}

impl Limit {
    /// Negative counts mean unlimited; zero disables the rule
    pub fn from_count(count: i64) -> Option<Limit> {
        match count {
            0 => None,
            n if n < 0 => Some(Limit::Unlimited),
            n => Some(Limit::Count(usize::try_from(n).unwrap_or(usize::MAX))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRule {
    pub granularity: Granularity,
    pub limit: Limit,
}

/// Enabled retention rules in fixed priority order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    within: Option<KeepWithin>,
    /// Sorted by granularity, at most one rule per granularity
    rules: Vec<BucketRule>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_within(mut self, within: KeepWithin) -> Self {
        self.within = Some(within);
        self
    }

    /// Set the count for one bucketed rule, replacing any previous count
    pub fn keep(mut self, granularity: Granularity, count: i64) -> Self {
        self.rules.retain(|rule| rule.granularity != granularity);
        if let Some(limit) = Limit::from_count(count) {
            let at = self
                .rules
                .partition_point(|rule| rule.granularity < granularity);
            self.rules.insert(at, BucketRule { granularity, limit });
        }
        self
    }

    pub fn within(&self) -> Option<&KeepWithin> {
        self.within.as_ref()
    }

    pub fn rules(&self) -> &[BucketRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.within.is_none() && self.rules.is_empty()
    }

    /// Validate raw options into a policy
    pub fn from_options(options: &PruneOptions) -> Result<Self, ConfigError> {
        if options.keep_last.is_some() && options.keep_secondly.is_some() {
            return Err(ConfigError::LastAndSecondly);
        }

        let mut policy = RetentionPolicy::new();
        if let Some(text) = options.keep_within.as_deref() {
            policy = policy.with_within(KeepWithin::parse(text)?);
        }

        let secondly = options.keep_last.or(options.keep_secondly);
        let counts = [
            (Granularity::Secondly, secondly),
            (Granularity::Minutely, options.keep_minutely),
            (Granularity::Hourly, options.keep_hourly),
            (Granularity::Daily, options.keep_daily),
            (Granularity::Weekly, options.keep_weekly),
            (Granularity::Monthly, options.keep_monthly),
            (Granularity::Yearly, options.keep_yearly),
        ];
        for (granularity, count) in counts {
            if let Some(count) = count {
                policy = policy.keep(granularity, count);
            }
        }

        if policy.is_empty() {
            return Err(ConfigError::NoRetention);
        }
        Ok(policy)
    }
}

/// Raw prune options, as given on the command line or in `[prune]` of config.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PruneOptions {
    pub prefix: Option<String>,
    pub keep_within: Option<String>,
    pub keep_last: Option<i64>,
    pub keep_secondly: Option<i64>,
    pub keep_minutely: Option<i64>,
    pub keep_hourly: Option<i64>,
    pub keep_daily: Option<i64>,
    pub keep_weekly: Option<i64>,
    pub keep_monthly: Option<i64>,
    pub keep_yearly: Option<i64>,
}

impl PruneOptions {
    /// Field-wise override: values set in `overrides` win
    ///
    /// `keep_last` and `keep_secondly` share one slot, so setting either in
    /// `overrides` clears both from `self`.
    pub fn overlay(mut self, overrides: &PruneOptions) -> PruneOptions {
        if overrides.keep_last.is_some() || overrides.keep_secondly.is_some() {
            self.keep_last = overrides.keep_last;
            self.keep_secondly = overrides.keep_secondly;
        }

        fn pick<T: Clone>(base: &mut Option<T>, over: &Option<T>) {
            if over.is_some() {
                base.clone_from(over);
            }
        }
        pick(&mut self.prefix, &overrides.prefix);
        pick(&mut self.keep_within, &overrides.keep_within);
        pick(&mut self.keep_minutely, &overrides.keep_minutely);
        pick(&mut self.keep_hourly, &overrides.keep_hourly);
        pick(&mut self.keep_daily, &overrides.keep_daily);
        pick(&mut self.keep_weekly, &overrides.keep_weekly);
        pick(&mut self.keep_monthly, &overrides.keep_monthly);
        pick(&mut self.keep_yearly, &overrides.keep_yearly);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_within_units() {
        assert_eq!(KeepWithin::parse("5H").unwrap().duration(), Duration::hours(5));
        assert_eq!(KeepWithin::parse("2d").unwrap().duration(), Duration::days(2));
        assert_eq!(KeepWithin::parse("3w").unwrap().duration(), Duration::days(21));
        // A month is exactly 31 days for this window
        assert_eq!(KeepWithin::parse("1m").unwrap().duration(), Duration::days(31));
        assert_eq!(KeepWithin::parse("1y").unwrap().duration(), Duration::days(365));
    }

    #[test]
    fn test_parse_within_rejects_malformed() {
        for bad in ["", "d", "2", "2x", "-2d", "0d", "2.5d", "99999999999999999999y"] {
            assert!(
                matches!(KeepWithin::parse(bad), Err(ConfigError::InvalidWithin { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_within_window_is_exclusive() {
        let within = KeepWithin::parse("1d").unwrap();
        let reference = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();

        assert!(within.contains(&(reference - Duration::hours(23)), reference));
        assert!(!within.contains(&(reference - Duration::hours(24)), reference));
        // Archives stamped after the reference time are inside the window
        assert!(within.contains(&(reference + Duration::hours(1)), reference));
    }

    #[test]
    fn test_rules_stay_in_granularity_order() {
        let policy = RetentionPolicy::new()
            .keep(Granularity::Yearly, 1)
            .keep(Granularity::Daily, 7)
            .keep(Granularity::Hourly, -1)
            .keep(Granularity::Monthly, 0);

        let order: Vec<_> = policy.rules().iter().map(|r| r.granularity).collect();
        assert_eq!(
            order,
            vec![Granularity::Hourly, Granularity::Daily, Granularity::Yearly]
        );
        assert_eq!(policy.rules()[0].limit, Limit::Unlimited);
    }

    #[test]
    fn test_keep_replaces_and_zero_removes() {
        let policy = RetentionPolicy::new()
            .keep(Granularity::Daily, 7)
            .keep(Granularity::Daily, 3);
        assert_eq!(policy.rules().len(), 1);
        assert_eq!(policy.rules()[0].limit, Limit::Count(3));

        let policy = policy.keep(Granularity::Daily, 0);
        assert!(policy.is_empty());
    }

    #[test]
    fn test_from_options_last_is_secondly() {
        let options = PruneOptions {
            keep_last: Some(3),
            ..Default::default()
        };
        let policy = RetentionPolicy::from_options(&options).unwrap();
        assert_eq!(
            policy.rules(),
            &[BucketRule {
                granularity: Granularity::Secondly,
                limit: Limit::Count(3)
            }]
        );
    }

    #[test]
    fn test_from_options_conflicts() {
        let options = PruneOptions {
            keep_last: Some(1),
            keep_secondly: Some(1),
            ..Default::default()
        };
        assert_eq!(
            RetentionPolicy::from_options(&options),
            Err(ConfigError::LastAndSecondly)
        );
    }

    #[test]
    fn test_from_options_requires_a_rule() {
        assert_eq!(
            RetentionPolicy::from_options(&PruneOptions::default()),
            Err(ConfigError::NoRetention)
        );

        let only_zero = PruneOptions {
            keep_daily: Some(0),
            ..Default::default()
        };
        assert_eq!(
            RetentionPolicy::from_options(&only_zero),
            Err(ConfigError::NoRetention)
        );

        let unlimited = PruneOptions {
            keep_yearly: Some(-1),
            ..Default::default()
        };
        assert!(RetentionPolicy::from_options(&unlimited).is_ok());
    }

    #[test]
    fn test_overlay_cli_over_config() {
        let config = PruneOptions {
            prefix: Some("host-".into()),
            keep_secondly: Some(10),
            keep_daily: Some(7),
            ..Default::default()
        };
        let cli = PruneOptions {
            keep_last: Some(2),
            keep_daily: Some(3),
            ..Default::default()
        };

        let merged = config.overlay(&cli);
        assert_eq!(merged.prefix.as_deref(), Some("host-"));
        assert_eq!(merged.keep_last, Some(2));
        assert_eq!(merged.keep_secondly, None);
        assert_eq!(merged.keep_daily, Some(3));
        assert!(RetentionPolicy::from_options(&merged).is_ok());
    }
}
