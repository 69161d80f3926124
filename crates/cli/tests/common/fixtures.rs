//! On-disk repository fixtures

use anyhow::Result;
use chrono::{Duration, Utc};
use darc_core::{hash_bytes, ArchiveRecord, ChunkRef, Repository, SledRepository};
use std::path::Path;
use tempfile::TempDir;

/// A repository in a temp dir
///
/// The database is closed between calls so the `darc` binary can open it.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        SledRepository::init(dir.path())?;
        Ok(Self { dir })
    }

    /// A repository with `days` archives named `<prefix><n>`, one per day
    ///
    /// `<prefix>1` is the newest. All archives share one 1 MB chunk and own
    /// a 4 KB chunk each.
    pub fn with_daily(prefix: &str, days: i64) -> Result<Self> {
        let repo = Self::new()?;
        repo.add_daily(prefix, days)?;
        Ok(repo)
    }

    pub fn add_daily(&self, prefix: &str, days: i64) -> Result<()> {
        let store = SledRepository::open(self.path())?;
        let now = Utc::now();
        let shared = ChunkRef::new(hash_bytes(b"shared"), 1024 * 1024);
        for day in (1..=days).rev() {
            let name = format!("{prefix}{day}");
            let own = ChunkRef::new(hash_bytes(name.as_bytes()), 4096);
            store.add_archive(&name, now - Duration::days(day), vec![shared, own])?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_str(&self) -> String {
        self.dir.path().display().to_string()
    }

    pub fn write_config(&self, text: &str) -> Result<()> {
        std::fs::write(self.dir.path().join("config.toml"), text)?;
        Ok(())
    }

    pub fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        Ok(SledRepository::open(self.path())?.list_archives()?)
    }

    pub fn archive_names(&self) -> Result<Vec<String>> {
        Ok(self.archives()?.into_iter().map(|r| r.name).collect())
    }
}
