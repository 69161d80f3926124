//! Repository configuration (`<repo>/config.toml`)

use anyhow::{Context, Result};
use darc_prune::PruneOptions;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Defaults for `darc prune`
    pub prune: PruneOptions,
}

impl RepoConfig {
    /// Load the configuration; a missing file means defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
