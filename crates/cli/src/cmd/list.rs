//! List archives

use crate::util;
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use darc_core::Repository;
use darc_prune::{classify::newest_first, format_time, partition::filter_by_prefix};
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>, prefix: Option<&str>) -> Result<()> {
    let repo = util::open_repo(repo)?;
    let catalog = repo.list_archives().context("Failed to read archive manifest")?;

    let mut archives = filter_by_prefix(&catalog, prefix);
    archives.sort_by(|a, b| newest_first(a, b));

    if archives.is_empty() {
        println!("{}", "No archives".dimmed());
        return Ok(());
    }

    let now = Utc::now();
    for archive in archives {
        let name = if archive.is_checkpoint() {
            archive.name.dimmed().to_string()
        } else {
            archive.name.clone()
        };
        println!(
            "{:<36} {} {}",
            name,
            format_time(&archive.timestamp, now, &Local),
            archive.id.short().yellow()
        );
    }
    Ok(())
}
