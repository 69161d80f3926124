//! Repository error type

use crate::hash::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("archive {0} not found")]
    ArchiveNotFound(ObjectId),

    #[error("archive {0} metadata failed integrity verification")]
    CorruptArchive(ObjectId),

    #[error("chunk accounting is inconsistent: {0}")]
    Integrity(String),

    #[error("not a darc repository: {0}")]
    NotARepository(String),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
