//! The durable key-value capability the engine consumes.
//!
//! The engine never opens LMDB (or any store) itself; it is handed a
//! [`KvStore`] and owns only the layout inside it: one database per
//! account shard, one for orderbooks, one for the header-hash map, with a
//! `"persisted block"` metadata record in each. Two reference
//! implementations ship here: an in-memory store for tests and fast
//! experiments, and a file-backed store for crash/replay testing.

use dashmap::DashMap;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Key of the per-database persistence watermark.
pub const PERSISTED_ROUND_KEY: &[u8] = b"persisted block";

/// Storage faults. All of these are fatal to the engine; recovery happens
/// through replay on the next start.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("kvstore io: {0}")]
    Io(#[from] std::io::Error),

    /// A database handle that was never opened.
    #[error("unknown database handle {0}")]
    UnknownDb(u32),

    /// Persisted bytes failed to decode.
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Handle to one named database inside a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbHandle(pub u32);

/// Minimal durable KV capability.
///
/// `write` is transactional per call: either every put/delete in the batch
/// lands or none do. `sync` flushes previously committed writes to stable
/// storage (the phase-2 fsync).
pub trait KvStore: Send + Sync {
    /// Open (creating if missing) a named database.
    fn open_db(&self, name: &str) -> StorageResult<DbHandle>;

    /// Atomically apply a batch of puts and deletes.
    fn write(
        &self,
        db: DbHandle,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StorageResult<()>;

    /// Point lookup.
    fn get(&self, db: DbHandle, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Visit every record in unspecified order.
    fn for_each(
        &self,
        db: DbHandle,
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> StorageResult<()>;

    /// Flush committed writes to stable storage.
    fn sync(&self) -> StorageResult<()>;
}

/// Read a database's persistence watermark (0 when unset).
pub fn persisted_round(store: &dyn KvStore, db: DbHandle) -> StorageResult<u64> {
    match store.get(db, PERSISTED_ROUND_KEY)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StorageError::Corrupt("persisted round width".into()))?;
            Ok(u64::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}

/// Batch entry updating a database's persistence watermark.
pub fn persisted_round_entry(round: u64) -> (Vec<u8>, Vec<u8>) {
    (PERSISTED_ROUND_KEY.to_vec(), round.to_be_bytes().to_vec())
}

/// In-memory [`KvStore`]. Write batches are atomic under a per-store lock;
/// `sync` is a no-op.
#[derive(Default)]
pub struct MemKvStore {
    names: RwLock<HashMap<String, DbHandle>>,
    dbs: RwLock<Vec<DashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemKvStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemKvStore {
    fn open_db(&self, name: &str) -> StorageResult<DbHandle> {
        let mut names = self.names.write().unwrap();
        if let Some(h) = names.get(name) {
            return Ok(*h);
        }
        let mut dbs = self.dbs.write().unwrap();
        let handle = DbHandle(dbs.len() as u32);
        dbs.push(DashMap::new());
        names.insert(name.to_string(), handle);
        Ok(handle)
    }

    fn write(
        &self,
        db: DbHandle,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StorageResult<()> {
        let dbs = self.dbs.read().unwrap();
        let map = dbs
            .get(db.0 as usize)
            .ok_or(StorageError::UnknownDb(db.0))?;
        for (k, v) in puts {
            map.insert(k.clone(), v.clone());
        }
        for k in deletes {
            map.remove(k);
        }
        Ok(())
    }

    fn get(&self, db: DbHandle, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let dbs = self.dbs.read().unwrap();
        let map = dbs
            .get(db.0 as usize)
            .ok_or(StorageError::UnknownDb(db.0))?;
        Ok(map.get(key).map(|v| v.clone()))
    }

    fn for_each(
        &self,
        db: DbHandle,
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> StorageResult<()> {
        let dbs = self.dbs.read().unwrap();
        let map = dbs
            .get(db.0 as usize)
            .ok_or(StorageError::UnknownDb(db.0))?;
        for entry in map.iter() {
            f(entry.key(), entry.value());
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// File-backed [`KvStore`]: one directory per database, one file per
/// record (hex-encoded key). Slow, simple, and honest about durability;
/// used by crash/replay tests.
pub struct FileKvStore {
    root: PathBuf,
    names: RwLock<HashMap<String, DbHandle>>,
    dirs: RwLock<Vec<PathBuf>>,
}

impl FileKvStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FileKvStore {
            root,
            names: RwLock::new(HashMap::new()),
            dirs: RwLock::new(Vec::new()),
        })
    }

    fn dir_of(&self, db: DbHandle) -> StorageResult<PathBuf> {
        self.dirs
            .read()
            .unwrap()
            .get(db.0 as usize)
            .cloned()
            .ok_or(StorageError::UnknownDb(db.0))
    }

    fn encode_key(key: &[u8]) -> String {
        let mut out = String::with_capacity(key.len() * 2);
        for b in key {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    fn decode_key(name: &str) -> Option<Vec<u8>> {
        if name.len() % 2 != 0 {
            return None;
        }
        (0..name.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&name[i..i + 2], 16).ok())
            .collect()
    }
}

impl KvStore for FileKvStore {
    fn open_db(&self, name: &str) -> StorageResult<DbHandle> {
        let mut names = self.names.write().unwrap();
        if let Some(h) = names.get(name) {
            return Ok(*h);
        }
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;
        let mut dirs = self.dirs.write().unwrap();
        let handle = DbHandle(dirs.len() as u32);
        dirs.push(dir);
        names.insert(name.to_string(), handle);
        Ok(handle)
    }

    fn write(
        &self,
        db: DbHandle,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StorageResult<()> {
        let dir = self.dir_of(db)?;
        for (k, v) in puts {
            let tmp = dir.join(format!("{}.tmp", Self::encode_key(k)));
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(v)?;
            std::fs::rename(&tmp, dir.join(Self::encode_key(k)))?;
        }
        for k in deletes {
            let path = dir.join(Self::encode_key(k));
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn get(&self, db: DbHandle, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let path = self.dir_of(db)?.join(Self::encode_key(key));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn for_each(
        &self,
        db: DbHandle,
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> StorageResult<()> {
        let dir = self.dir_of(db)?;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".tmp") {
                continue;
            }
            let Some(key) = Self::decode_key(name) else {
                continue;
            };
            let value = std::fs::read(entry.path())?;
            f(&key, &value);
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Individual files are written via create+rename; directory-level
        // fsync is skipped because the replay path tolerates a torn tail.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        let db = store.open_db("accounts_0").unwrap();
        assert_eq!(store.open_db("accounts_0").unwrap(), db);

        store
            .write(
                db,
                &[
                    (b"a".to_vec(), b"1".to_vec()),
                    (b"b".to_vec(), b"2".to_vec()),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(store.get(db, b"a").unwrap(), Some(b"1".to_vec()));
        store.write(db, &[], &[b"a".to_vec()]).unwrap();
        assert_eq!(store.get(db, b"a").unwrap(), None);

        let mut seen = Vec::new();
        store
            .for_each(db, &mut |k, v| seen.push((k.to_vec(), v.to_vec())))
            .unwrap();
        assert_eq!(seen, vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_mem_store() {
        exercise(&MemKvStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileKvStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_persisted_round_helpers() {
        let store = MemKvStore::new();
        let db = store.open_db("x").unwrap();
        assert_eq!(persisted_round(&store, db).unwrap(), 0);
        store.write(db, &[persisted_round_entry(42)], &[]).unwrap();
        assert_eq!(persisted_round(&store, db).unwrap(), 42);
    }

    #[test]
    fn test_file_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKvStore::open(dir.path()).unwrap();
            let db = store.open_db("hdr").unwrap();
            store.write(db, &[persisted_round_entry(7)], &[]).unwrap();
        }
        let store = FileKvStore::open(dir.path()).unwrap();
        let db = store.open_db("hdr").unwrap();
        assert_eq!(persisted_round(&store, db).unwrap(), 7);
    }
}
