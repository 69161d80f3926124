//! Create a new repository

use anyhow::{Context, Result};
use darc_core::SledRepository;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(path: &Path) -> Result<()> {
    let repo = SledRepository::init(path)
        .with_context(|| format!("Failed to initialize repository at {}", path.display()))?;

    println!(
        "{} {}",
        "Initialized empty darc repository in".green(),
        repo.root().display()
    );
    println!(
        "{}",
        format!("Retention defaults can be set in {}", repo.config_path().display()).dimmed()
    );
    Ok(())
}
