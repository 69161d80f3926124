//! Prune archives according to retention rules

use crate::config::RepoConfig;
use crate::util;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use clap::Args;
use darc_core::SledRepository;
use darc_prune::{
    listing, ArchiveOutcome, Decision, DecisionEntry, ExecuteOptions, PruneError, PruneObserver,
    PruneOptions, PruneOutcome, PruneRequest, Verdict,
};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::fmt::Display;
use std::path::PathBuf;

#[derive(Args, Debug, Default)]
pub struct PruneArgs {
    /// Only consider archives whose name starts with this prefix
    #[arg(short = 'P', long)]
    pub prefix: Option<String>,

    /// Keep all archives newer than this interval (e.g. 10H, 2d, 3w, 1m, 1y)
    #[arg(long, value_name = "INTERVAL")]
    pub keep_within: Option<String>,

    /// Number of most recent archives to keep (same as --keep-secondly)
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub keep_last: Option<i64>,

    /// Number of secondly archives to keep
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub keep_secondly: Option<i64>,

    /// Number of minutely archives to keep
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub keep_minutely: Option<i64>,

    /// Number of hourly archives to keep
    #[arg(short = 'H', long, value_name = "N", allow_hyphen_values = true)]
    pub keep_hourly: Option<i64>,

    /// Number of daily archives to keep
    #[arg(short = 'd', long, value_name = "N", allow_hyphen_values = true)]
    pub keep_daily: Option<i64>,

    /// Number of weekly archives to keep
    #[arg(short = 'w', long, value_name = "N", allow_hyphen_values = true)]
    pub keep_weekly: Option<i64>,

    /// Number of monthly archives to keep (-1 for unlimited)
    #[arg(short = 'm', long, value_name = "N", allow_hyphen_values = true)]
    pub keep_monthly: Option<i64>,

    /// Number of yearly archives to keep (-1 for unlimited)
    #[arg(short = 'y', long, value_name = "N", allow_hyphen_values = true)]
    pub keep_yearly: Option<i64>,

    /// Do not change the repository
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Delete archives whose metadata is corrupt
    #[arg(long)]
    pub force: bool,

    /// Reclaim freed space immediately
    #[arg(long)]
    pub save_space: bool,

    /// Print a line per archive
    #[arg(long)]
    pub list: bool,

    /// Print statistics
    #[arg(short, long)]
    pub stats: bool,

    /// Show a progress bar while deleting
    #[arg(short, long)]
    pub progress: bool,

    /// Compute time buckets in UTC instead of local time
    #[arg(long)]
    pub utc: bool,
}

impl PruneArgs {
    fn options(&self) -> PruneOptions {
        PruneOptions {
            prefix: self.prefix.clone(),
            keep_within: self.keep_within.clone(),
            keep_last: self.keep_last,
            keep_secondly: self.keep_secondly,
            keep_minutely: self.keep_minutely,
            keep_hourly: self.keep_hourly,
            keep_daily: self.keep_daily,
            keep_weekly: self.keep_weekly,
            keep_monthly: self.keep_monthly,
            keep_yearly: self.keep_yearly,
        }
    }

    fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: self.dry_run,
            force: self.force,
            save_space: self.save_space,
        }
    }
}

pub fn run(repo: Option<PathBuf>, args: PruneArgs) -> Result<()> {
    let root = util::find_repo_root(repo)?;
    let config = RepoConfig::load(&root.join("config.toml"))?;
    let options = config.prune.overlay(&args.options());

    // Validation happens before the repository is opened
    let request = PruneRequest::from_options(&options, args.execute_options())?;
    let repo = util::open_at(&root)?;

    let reference = Utc::now();
    if args.utc {
        prune_in(&repo, &request, &args, reference, &Utc)
    } else {
        prune_in(&repo, &request, &args, reference, &Local)
    }
}

fn prune_in<Tz>(
    repo: &SledRepository,
    request: &PruneRequest,
    args: &PruneArgs,
    reference: DateTime<Utc>,
    tz: &Tz,
) -> Result<()>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut progress = DeletionProgress::new(args.progress && !args.dry_run);

    let outcome = match darc_prune::run(repo, request, reference, tz, &mut progress) {
        Ok(outcome) => outcome,
        Err(PruneError::LockUnavailable(msg)) => {
            anyhow::bail!("Repository is locked by another operation: {}", msg)
        }
        Err(e) => return Err(e).context("Prune failed"),
    };
    progress.finish();

    if args.list {
        print_listing(&outcome, reference, tz);
    }
    if args.stats {
        print_stats(&outcome);
    }

    let failures = outcome.execution.failures();
    if failures > 0 {
        anyhow::bail!(
            "{} archive(s) could not be pruned; see messages above",
            failures
        );
    }
    Ok(())
}

fn print_listing<Tz>(outcome: &PruneOutcome, reference: DateTime<Utc>, tz: &Tz)
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    for line in listing(&outcome.decision, Some(&outcome.execution)) {
        let text = line.render(reference, tz);
        match (line.entry.verdict, line.outcome) {
            (Verdict::Prune, Some(outcome)) if outcome.is_failure() => println!("{}", text.red()),
            (Verdict::Prune, _) => println!("{}", text.yellow()),
            _ => println!("{}", text),
        }
    }
}

fn print_stats(outcome: &PruneOutcome) {
    let stats = outcome.stats();
    println!();
    println!("{}", "Prune Statistics".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for line in stats.lines(outcome.execution.dry_run) {
        println!("{}", line);
    }
}

/// Progress bar over pruned archives
struct DeletionProgress {
    enabled: bool,
    bar: Option<ProgressBar>,
}

impl DeletionProgress {
    fn new(enabled: bool) -> Self {
        Self { enabled, bar: None }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl PruneObserver for DeletionProgress {
    fn planned(&mut self, decision: &Decision) {
        if !self.enabled {
            return;
        }
        let total = decision.pruned().count() as u64;
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        self.bar = Some(bar);
    }

    fn archive_done(&mut self, entry: &DecisionEntry, _outcome: &ArchiveOutcome) {
        if let Some(bar) = &self.bar {
            bar.set_message(entry.record.name.clone());
            bar.inc(1);
        }
    }
}
