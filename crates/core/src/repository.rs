//! Repository interface consumed by the prune engine

use crate::archive::ArchiveRecord;
use crate::hash::ObjectId;

/// Chunk accounting effects of deleting one archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    /// Chunk references released (refcount decrements)
    pub chunks_released: u64,
    /// Chunks whose refcount reached zero
    pub chunks_orphaned: u64,
    /// Stored bytes of the orphaned chunks
    pub bytes_orphaned: u64,
}

impl DeleteStats {
    pub fn merge(&mut self, other: &DeleteStats) {
        self.chunks_released += other.chunks_released;
        self.chunks_orphaned += other.chunks_orphaned;
        self.bytes_orphaned += other.bytes_orphaned;
    }
}

/// Result of a repository commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Chunks physically reclaimed by this commit
    pub chunks_reclaimed: u64,
    pub bytes_reclaimed: u64,
}

/// Operations the prune engine needs from a repository
///
/// Callers hold the guard returned by `acquire_exclusive_lock` for the
/// whole span from `list_archives` to `commit`.
pub trait Repository {
    /// Exclusive lock guard; dropping it releases the lock
    type Lock;

    /// Take the repository-wide exclusive lock without blocking
    fn acquire_exclusive_lock(&self) -> crate::Result<Self::Lock>;

    /// Snapshot of every archive in manifest order
    fn list_archives(&self) -> crate::Result<Vec<ArchiveRecord>>;

    /// Whether the stored metadata still hashes to `id`
    fn verify_archive_metadata(&self, id: &ObjectId) -> crate::Result<bool>;

    /// Delete an archive and release its chunk references atomically
    fn delete_archive(&self, id: &ObjectId) -> crate::Result<DeleteStats>;

    /// Drop an archive whose metadata cannot be trusted, without touching chunk refcounts
    fn force_delete_archive(&self, id: &ObjectId) -> crate::Result<()>;

    /// Make deletions durable; with `save_space`, reclaim orphaned chunks now
    fn commit(&self, save_space: bool) -> crate::Result<CommitStats>;
}
