//! Sled-backed repository with chunk refcount accounting

use crate::archive::{ArchiveMeta, ArchiveRecord, ChunkRef};
use crate::error::RepositoryError;
use crate::hash::ObjectId;
use crate::lock::{LockGuard, RepoLock};
use crate::repository::{CommitStats, DeleteStats, Repository};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, IVec, Tree};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const DB_DIR: &str = "repo.db";
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_CONFIG: &str = "\
# darc repository configuration

[prune]
# Defaults for `darc prune`; command-line options override these.
# keep_within = \"2d\"
# keep_daily = 7
# keep_weekly = 4
# keep_monthly = -1
";

/// Manifest row: enough to list archives without loading metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    id: ObjectId,
    name: String,
    time: DateTime<Utc>,
}

/// Chunk index row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub refcount: u64,
    pub size: u64,
}

/// Repository stored in a sled database
///
/// Layout:
/// ```text
/// <repo>/
///   config.toml
///   lock
///   repo.db/        manifest, positions, archives, chunks, orphans trees
/// ```
///
/// An open handle holds the repository lock until it is dropped, so a
/// second handle fails with `LockUnavailable` before sled is touched.
#[derive(Debug)]
pub struct SledRepository {
    root: PathBuf,
    db: Db,
    /// seq (big-endian u64) -> ManifestEntry
    manifest: Tree,
    /// archive id -> manifest key
    positions: Tree,
    /// archive id -> serialized ArchiveMeta
    archives: Tree,
    /// chunk id -> ChunkEntry
    chunks: Tree,
    /// chunk id -> stored size, refcount reached zero, awaiting compaction
    orphans: Tree,
    seq_counter: AtomicU64,
    /// Serializes every refcount mutation within this process
    refcount_guard: Mutex<()>,
    /// Declared last: released only after the database is closed
    lock: RepoLock,
}

type TxResult<T> = Result<T, ConflictableTransactionError<RepositoryError>>;

impl SledRepository {
    /// Create a new, empty repository at `root`
    pub fn init(root: &Path) -> crate::Result<Self> {
        if root.join(DB_DIR).exists() {
            return Err(RepositoryError::NotARepository(format!(
                "{} already contains a repository",
                root.display()
            )));
        }
        std::fs::create_dir_all(root.join(DB_DIR))?;
        std::fs::write(root.join(CONFIG_FILE), DEFAULT_CONFIG)?;
        tracing::info!(path = %root.display(), "initialized repository");
        Self::open(root)
    }

    /// Open an existing repository
    pub fn open(root: &Path) -> crate::Result<Self> {
        let db_path = root.join(DB_DIR);
        if !db_path.is_dir() {
            return Err(RepositoryError::NotARepository(root.display().to_string()));
        }

        let lock = RepoLock::acquire(root)?;
        let db = sled::open(&db_path)?;
        let manifest = db.open_tree("manifest")?;
        let positions = db.open_tree("positions")?;
        let archives = db.open_tree("archives")?;
        let chunks = db.open_tree("chunks")?;
        let orphans = db.open_tree("orphans")?;

        let next_seq = match manifest.last()? {
            Some((key, _)) => decode_seq(&key)? + 1,
            None => 0,
        };

        Ok(Self {
            root: root.to_path_buf(),
            db,
            manifest,
            positions,
            archives,
            chunks,
            orphans,
            seq_counter: AtomicU64::new(next_seq),
            refcount_guard: Mutex::new(()),
            lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Record a new archive and take one reference per chunk ref
    pub fn add_archive(
        &self,
        name: &str,
        time: DateTime<Utc>,
        chunks: Vec<ChunkRef>,
    ) -> crate::Result<ArchiveRecord> {
        let meta = ArchiveMeta::new(name, time, chunks);
        let (id, bytes) = meta.encode()?;

        let _guard = self.refcount_guard.lock();
        if self.archives.contains_key(id.as_bytes())? {
            return Err(RepositoryError::Integrity(format!(
                "archive {} already exists",
                id
            )));
        }

        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let entry = bincode::serialize(&ManifestEntry {
            id,
            name: name.to_string(),
            time,
        })?;

        let tables = (
            &self.manifest,
            &self.positions,
            &self.archives,
            &self.chunks,
            &self.orphans,
        );
        let result = tables.transaction(|(manifest, positions, archives, chunks, orphans)| {
            for chunk in &meta.chunks {
                let key = &chunk.id.as_bytes()[..];
                let current = match chunks.get(key)? {
                    Some(raw) => decode_chunk(&raw)?,
                    None => {
                        // Re-referencing an orphan revives it
                        orphans.remove(key)?;
                        ChunkEntry {
                            refcount: 0,
                            size: chunk.size,
                        }
                    }
                };
                let updated = ChunkEntry {
                    refcount: current.refcount + 1,
                    size: current.size,
                };
                chunks.insert(key, encode_chunk(&updated)?)?;
            }
            archives.insert(&id.as_bytes()[..], bytes.clone())?;
            manifest.insert(&seq.to_be_bytes()[..], entry.clone())?;
            positions.insert(&id.as_bytes()[..], &seq.to_be_bytes()[..])?;
            Ok(())
        });
        unwrap_tx(result)?;
        self.db.flush()?;

        tracing::debug!(archive = %name, id = %id.short(), seq, "added archive");
        Ok(ArchiveRecord::new(id, name, time, seq))
    }

    /// Load and verify an archive's metadata
    pub fn archive_meta(&self, id: &ObjectId) -> crate::Result<ArchiveMeta> {
        let bytes = self
            .archives
            .get(id.as_bytes())?
            .ok_or(RepositoryError::CorruptArchive(*id))?;
        if !ArchiveMeta::verify(id, &bytes) {
            return Err(RepositoryError::CorruptArchive(*id));
        }
        ArchiveMeta::decode(&bytes)
    }

    /// Current refcount of a chunk (None if unknown or orphaned)
    pub fn chunk_refcount(&self, id: &ObjectId) -> crate::Result<Option<u64>> {
        match self.chunks.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode_chunk_plain(&raw)?.refcount)),
            None => Ok(None),
        }
    }

    /// Number of chunks waiting for compaction
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Reclaim every chunk whose refcount reached zero
    pub fn compact(&self) -> crate::Result<CommitStats> {
        let _guard = self.refcount_guard.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> crate::Result<CommitStats> {
        let mut stats = CommitStats::default();
        for item in self.orphans.iter() {
            let (key, value) = item?;
            stats.chunks_reclaimed += 1;
            stats.bytes_reclaimed += decode_size(&value)?;
            self.orphans.remove(key)?;
        }
        self.db.flush()?;

        if stats.chunks_reclaimed > 0 {
            tracing::info!(
                chunks = stats.chunks_reclaimed,
                bytes = stats.bytes_reclaimed,
                "compacted orphaned chunks"
            );
        }
        Ok(stats)
    }

    /// Manifest key of an archive, looked up through the positions index
    fn manifest_key(&self, id: &ObjectId) -> crate::Result<IVec> {
        self.positions
            .get(id.as_bytes())?
            .ok_or(RepositoryError::ArchiveNotFound(*id))
    }
}

impl Repository for SledRepository {
    type Lock = LockGuard;

    fn acquire_exclusive_lock(&self) -> crate::Result<LockGuard> {
        self.lock.claim()
    }

    fn list_archives(&self) -> crate::Result<Vec<ArchiveRecord>> {
        let mut records = Vec::with_capacity(self.manifest.len());
        for item in self.manifest.iter() {
            let (key, value) = item?;
            let entry: ManifestEntry = bincode::deserialize(&value)?;
            records.push(ArchiveRecord::new(
                entry.id,
                entry.name,
                entry.time,
                decode_seq(&key)?,
            ));
        }
        Ok(records)
    }

    fn verify_archive_metadata(&self, id: &ObjectId) -> crate::Result<bool> {
        Ok(match self.archives.get(id.as_bytes())? {
            Some(bytes) => ArchiveMeta::verify(id, &bytes),
            None => false,
        })
    }

    fn delete_archive(&self, id: &ObjectId) -> crate::Result<DeleteStats> {
        let _guard = self.refcount_guard.lock();

        let manifest_key = self.manifest_key(id)?;
        let meta = self.archive_meta(id)?;

        let tables = (
            &self.manifest,
            &self.positions,
            &self.archives,
            &self.chunks,
            &self.orphans,
        );
        let result =
            tables.transaction(|(manifest, positions, archives, chunks, orphans)| {
                let mut stats = DeleteStats::default();
                for chunk in &meta.chunks {
                    let key = &chunk.id.as_bytes()[..];
                    let current = match chunks.get(key)? {
                        Some(raw) => decode_chunk(&raw)?,
                        None => {
                            return Err(abort(format!(
                                "archive {} references unknown chunk {}",
                                id, chunk.id
                            )))
                        }
                    };
                    if current.refcount == 0 {
                        return Err(abort(format!("chunk {} refcount underflow", chunk.id)));
                    }

                    stats.chunks_released += 1;
                    let refcount = current.refcount - 1;
                    if refcount == 0 {
                        chunks.remove(key)?;
                        orphans.insert(key, current.size.to_be_bytes().to_vec())?;
                        stats.chunks_orphaned += 1;
                        stats.bytes_orphaned += current.size;
                    } else {
                        let updated = ChunkEntry {
                            refcount,
                            size: current.size,
                        };
                        chunks.insert(key, encode_chunk(&updated)?)?;
                    }
                }
                archives.remove(&id.as_bytes()[..])?;
                positions.remove(&id.as_bytes()[..])?;
                manifest.remove(manifest_key.clone())?;
                Ok(stats)
            });
        let stats = unwrap_tx(result)?;

        tracing::debug!(
            archive = %meta.name,
            released = stats.chunks_released,
            orphaned = stats.chunks_orphaned,
            "deleted archive"
        );
        Ok(stats)
    }

    fn force_delete_archive(&self, id: &ObjectId) -> crate::Result<()> {
        let _guard = self.refcount_guard.lock();

        let manifest_key = self.manifest_key(id)?;

        let tables = (&self.manifest, &self.positions, &self.archives);
        let result = tables.transaction(|(manifest, positions, archives)| {
            archives.remove(&id.as_bytes()[..])?;
            positions.remove(&id.as_bytes()[..])?;
            manifest.remove(manifest_key.clone())?;
            Ok(())
        });
        unwrap_tx(result)?;

        tracing::warn!(id = %id.short(), "force-deleted archive; its chunk references were not released");
        Ok(())
    }

    fn commit(&self, save_space: bool) -> crate::Result<CommitStats> {
        if save_space {
            let _guard = self.refcount_guard.lock();
            return self.compact_locked();
        }
        self.db.flush()?;
        Ok(CommitStats::default())
    }
}

fn abort(message: String) -> ConflictableTransactionError<RepositoryError> {
    ConflictableTransactionError::Abort(RepositoryError::Integrity(message))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<RepositoryError>>) -> crate::Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => RepositoryError::Store(e),
    })
}

fn encode_chunk(entry: &ChunkEntry) -> TxResult<Vec<u8>> {
    bincode::serialize(entry)
        .map_err(|e| ConflictableTransactionError::Abort(RepositoryError::Encoding(e)))
}

fn decode_chunk(raw: &[u8]) -> TxResult<ChunkEntry> {
    decode_chunk_plain(raw).map_err(ConflictableTransactionError::Abort)
}

fn decode_chunk_plain(raw: &[u8]) -> crate::Result<ChunkEntry> {
    Ok(bincode::deserialize(raw)?)
}

fn decode_seq(key: &[u8]) -> crate::Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| RepositoryError::Integrity("malformed manifest key".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_size(raw: &[u8]) -> crate::Result<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| RepositoryError::Integrity("malformed orphan entry".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn chunk(tag: &str, size: u64) -> ChunkRef {
        ChunkRef::new(hash_bytes(tag.as_bytes()), size)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_init_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");

        {
            let repo = SledRepository::init(&root).unwrap();
            assert!(repo.config_path().exists());
            repo.add_archive("a", at(1), vec![chunk("x", 5)]).unwrap();
        }

        let repo = SledRepository::open(&root).unwrap();
        let record = repo.add_archive("b", at(2), vec![]).unwrap();
        // seq continues after reopening
        assert_eq!(record.seq, 1);
        assert_eq!(repo.list_archives().unwrap().len(), 2);
    }

    #[test]
    fn test_open_missing_repository() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            SledRepository::open(temp_dir.path()),
            Err(RepositoryError::NotARepository(_))
        ));
    }

    #[test]
    fn test_shared_chunks_survive_deletion() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();

        let shared = chunk("shared", 100);
        let only_old = chunk("old", 40);
        let old = repo.add_archive("old", at(1), vec![shared, only_old]).unwrap();
        let _new = repo.add_archive("new", at(2), vec![shared]).unwrap();
        assert_eq!(repo.chunk_refcount(&shared.id).unwrap(), Some(2));

        let stats = repo.delete_archive(&old.id).unwrap();
        assert_eq!(stats.chunks_released, 2);
        assert_eq!(stats.chunks_orphaned, 1);
        assert_eq!(stats.bytes_orphaned, 40);

        assert_eq!(repo.chunk_refcount(&shared.id).unwrap(), Some(1));
        assert_eq!(repo.chunk_refcount(&only_old.id).unwrap(), None);
        assert_eq!(repo.orphan_count(), 1);

        let names: Vec<_> = repo.list_archives().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["new"]);
    }

    #[test]
    fn test_repeated_chunk_references() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();

        let c = chunk("dup", 8);
        let a = repo.add_archive("a", at(1), vec![c, c, c]).unwrap();
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), Some(3));

        let stats = repo.delete_archive(&a.id).unwrap();
        assert_eq!(stats.chunks_released, 3);
        assert_eq!(stats.chunks_orphaned, 1);
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), None);
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        let c = chunk("c", 1);
        let a = repo.add_archive("a", at(1), vec![c]).unwrap();
        let _b = repo.add_archive("b", at(2), vec![c]).unwrap();

        repo.delete_archive(&a.id).unwrap();
        assert!(matches!(
            repo.delete_archive(&a.id),
            Err(RepositoryError::ArchiveNotFound(_))
        ));
        // The failed second delete released nothing
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), Some(1));
    }

    #[test]
    fn test_corrupt_archive_is_detected() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        let c = chunk("c", 1);
        let a = repo.add_archive("a", at(1), vec![c]).unwrap();

        repo.archives.insert(a.id.as_bytes(), b"garbage".to_vec()).unwrap();

        assert!(!repo.verify_archive_metadata(&a.id).unwrap());
        assert!(matches!(
            repo.delete_archive(&a.id),
            Err(RepositoryError::CorruptArchive(_))
        ));
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), Some(1));

        repo.force_delete_archive(&a.id).unwrap();
        assert!(repo.list_archives().unwrap().is_empty());
        // Forced deletion leaves chunk accounting untouched
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), Some(1));
    }

    #[test]
    fn test_commit_with_save_space_compacts() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        let a = repo.add_archive("a", at(1), vec![chunk("p", 30), chunk("q", 12)]).unwrap();
        repo.delete_archive(&a.id).unwrap();

        assert_eq!(repo.commit(false).unwrap(), CommitStats::default());
        assert_eq!(repo.orphan_count(), 2);

        let stats = repo.commit(true).unwrap();
        assert_eq!(stats.chunks_reclaimed, 2);
        assert_eq!(stats.bytes_reclaimed, 42);
        assert_eq!(repo.orphan_count(), 0);
    }

    #[test]
    fn test_orphan_revived_by_new_archive() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        let c = chunk("c", 9);
        let a = repo.add_archive("a", at(1), vec![c]).unwrap();
        repo.delete_archive(&a.id).unwrap();
        assert_eq!(repo.orphan_count(), 1);

        repo.add_archive("b", at(2), vec![c]).unwrap();
        assert_eq!(repo.orphan_count(), 0);
        assert_eq!(repo.chunk_refcount(&c.id).unwrap(), Some(1));
    }

    #[test]
    fn test_init_fresh_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("fresh");

        let repo = SledRepository::init(&root).unwrap();
        assert!(repo.list_archives().unwrap().is_empty());
        assert!(root.join(DB_DIR).is_dir());
    }

    #[test]
    fn test_init_refuses_existing_repository() {
        let temp_dir = TempDir::new().unwrap();
        drop(SledRepository::init(temp_dir.path()).unwrap());
        assert!(matches!(
            SledRepository::init(temp_dir.path()),
            Err(RepositoryError::NotARepository(_))
        ));
    }

    #[test]
    fn test_second_handle_reports_lock() {
        let temp_dir = TempDir::new().unwrap();
        let _repo = SledRepository::init(temp_dir.path()).unwrap();

        match SledRepository::open(temp_dir.path()) {
            Err(RepositoryError::LockUnavailable(msg)) => {
                assert!(msg.contains(&std::process::id().to_string()));
            }
            Err(e) => panic!("expected LockUnavailable, got {}", e),
            Ok(_) => panic!("second handle opened a locked repository"),
        }
    }

    #[test]
    fn test_lock_released_when_handle_dropped() {
        let temp_dir = TempDir::new().unwrap();
        drop(SledRepository::init(temp_dir.path()).unwrap());
        assert!(SledRepository::open(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_exclusive_lock_claimed_once() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();

        let guard = repo.acquire_exclusive_lock().unwrap();
        assert!(matches!(
            repo.acquire_exclusive_lock(),
            Err(RepositoryError::LockUnavailable(_))
        ));
        guard.release();
        assert!(repo.acquire_exclusive_lock().is_ok());
    }

    #[test]
    fn test_concurrent_deletes_keep_refcounts() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();

        let shared = chunk("shared", 64);
        let records: Vec<_> = (0..40u32)
            .map(|i| {
                let own = chunk(&format!("own-{}", i), 8);
                let time = at(1) + chrono::Duration::minutes(i as i64);
                repo.add_archive(&format!("a-{}", i), time, vec![shared, own])
                    .unwrap()
            })
            .collect();
        assert_eq!(repo.chunk_refcount(&shared.id).unwrap(), Some(40));

        let doomed = &records[..30];
        std::thread::scope(|scope| {
            for batch in doomed.chunks(5) {
                let repo = &repo;
                scope.spawn(move || {
                    for record in batch {
                        repo.delete_archive(&record.id).unwrap();
                    }
                });
            }
        });

        assert_eq!(repo.chunk_refcount(&shared.id).unwrap(), Some(10));
        assert_eq!(repo.orphan_count(), 30);
        assert_eq!(repo.list_archives().unwrap().len(), 10);
    }

    #[test]
    fn test_delete_uses_positions_index() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        let a = repo.add_archive("a", at(1), vec![]).unwrap();
        let b = repo.add_archive("b", at(2), vec![]).unwrap();
        assert_eq!(repo.positions.len(), 2);

        repo.delete_archive(&a.id).unwrap();
        assert_eq!(repo.positions.len(), 1);
        let key = repo.manifest_key(&b.id).unwrap();
        assert_eq!(decode_seq(&key).unwrap(), b.seq);

        repo.force_delete_archive(&b.id).unwrap();
        assert!(repo.positions.is_empty());
        assert!(matches!(
            repo.manifest_key(&b.id),
            Err(RepositoryError::ArchiveNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_archive_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SledRepository::init(temp_dir.path()).unwrap();
        repo.add_archive("a", at(1), vec![]).unwrap();
        assert!(repo.add_archive("a", at(1), vec![]).is_err());
    }
}
