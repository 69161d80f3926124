//! Reclaim orphaned chunks

use crate::util;
use anyhow::{Context, Result};
use darc_core::Repository;
use darc_prune::format_size;
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>) -> Result<()> {
    let repo = util::open_repo(repo)?;
    let _lock = repo.acquire_exclusive_lock().context("Failed to lock repository")?;

    let stats = repo.compact().context("Compaction failed")?;

    if stats.chunks_reclaimed == 0 {
        println!("{}", "Nothing to compact - no unreferenced chunks".dimmed());
    } else {
        println!("Chunks reclaimed: {}", stats.chunks_reclaimed.to_string().yellow());
        println!("Space reclaimed:  {}", format_size(stats.bytes_reclaimed).green());
    }
    Ok(())
}
