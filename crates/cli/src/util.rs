//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use darc_core::{RepositoryError, SledRepository};
use std::path::{Path, PathBuf};

const DB_DIR: &str = "repo.db";

/// Resolve the repository root
///
/// An explicit `--repo` wins; otherwise walk up from cwd to the first
/// directory holding a `repo.db`.
pub fn find_repo_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let mut current = std::env::current_dir()
        .context("Failed to get current directory")?;

    loop {
        if is_repository(&current) {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => anyhow::bail!("Not a darc repository (no repo.db found); pass --repo"),
        }
    }
}

pub fn is_repository(path: &Path) -> bool {
    path.join(DB_DIR).is_dir()
}

pub fn open_repo(explicit: Option<PathBuf>) -> Result<SledRepository> {
    let root = find_repo_root(explicit)?;
    open_at(&root)
}

/// Open the repository at `root`, holding its lock for the handle's lifetime
pub fn open_at(root: &Path) -> Result<SledRepository> {
    match SledRepository::open(root) {
        Ok(repo) => Ok(repo),
        Err(RepositoryError::LockUnavailable(msg)) => {
            anyhow::bail!("Repository is locked by another operation: {}", msg)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to open repository at {}", root.display())),
    }
}
