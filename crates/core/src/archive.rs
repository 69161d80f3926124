//! Archive records and stored archive metadata

use crate::hash::{hash_bytes, ObjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix marking an incomplete archive left by an interrupted backup
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint";

/// Read-only view of one archive as listed in the repository manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// Content-addressed id of the archive metadata
    pub id: ObjectId,
    /// Archive name
    pub name: String,
    /// Archive start time
    pub timestamp: DateTime<Utc>,
    /// Manifest insertion sequence (higher = created later)
    pub seq: u64,
}

impl ArchiveRecord {
    pub fn new(id: ObjectId, name: impl Into<String>, timestamp: DateTime<Utc>, seq: u64) -> Self {
        Self {
            id,
            name: name.into(),
            timestamp,
            seq,
        }
    }

    /// Whether this archive is an incomplete checkpoint
    pub fn is_checkpoint(&self) -> bool {
        is_checkpoint_name(&self.name)
    }
}

/// Matches `<name>.checkpoint` and `<name>.checkpoint.<N>`
pub fn is_checkpoint_name(name: &str) -> bool {
    if name.ends_with(CHECKPOINT_SUFFIX) {
        return true;
    }
    match name.rsplit_once('.') {
        Some((head, counter)) => {
            !counter.is_empty()
                && counter.bytes().all(|b| b.is_ascii_digit())
                && head.ends_with(CHECKPOINT_SUFFIX)
        }
        None => false,
    }
}

/// One reference from an archive to a stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ObjectId,
    /// Stored size in bytes
    pub size: u64,
}

impl ChunkRef {
    pub fn new(id: ObjectId, size: u64) -> Self {
        Self { id, size }
    }
}

/// Archive metadata as serialized into the repository
///
/// The archive id is the hash of these serialized bytes, so any on-disk
/// modification is detected by `verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub name: String,
    pub time: DateTime<Utc>,
    /// Every chunk reference, with multiplicity
    pub chunks: Vec<ChunkRef>,
}

impl ArchiveMeta {
    pub fn new(name: impl Into<String>, time: DateTime<Utc>, chunks: Vec<ChunkRef>) -> Self {
        Self {
            name: name.into(),
            time,
            chunks,
        }
    }

    /// Serialize and compute the content id
    pub fn encode(&self) -> crate::Result<(ObjectId, Vec<u8>)> {
        let bytes = bincode::serialize(self)?;
        Ok((hash_bytes(&bytes), bytes))
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Check stored bytes against the id they were filed under
    pub fn verify(id: &ObjectId, bytes: &[u8]) -> bool {
        hash_bytes(bytes) == *id && Self::decode(bytes).is_ok()
    }
}
