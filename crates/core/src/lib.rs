//! Darc Core - repository primitives for the darc backup tool
//!
//! This crate provides the storage-facing side of pruning:
//! - BLAKE3 content identifiers for archives and chunks
//! - Archive records and serialized archive metadata
//! - The `Repository` trait consumed by the prune engine
//! - A sled-backed repository with chunk refcount accounting
//! - Exclusive repository locking

pub mod archive;
pub mod error;
pub mod hash;
pub mod lock;
pub mod repository;
pub mod store;

// Re-exports
pub use archive::{ArchiveMeta, ArchiveRecord, ChunkRef};
pub use error::RepositoryError;
pub use hash::{hash_bytes, ObjectId};
pub use lock::{LockGuard, RepoLock};
pub use repository::{CommitStats, DeleteStats, Repository};
pub use store::SledRepository;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;
