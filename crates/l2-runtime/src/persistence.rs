//! Key-value persistence
//!
//! The chain store is written purely against [`KvStore`]: point reads,
//! point writes and an atomic multi-key batch. Two backends are provided,
//! an in-memory map and a sled database on disk.

use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// A single operation in a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Set of writes applied all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Durable (or not) key-value capability
pub trait KvStore: Send + Sync {
    fn has(&self, key: &[u8]) -> StoreResult<bool>;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Apply every operation of the batch atomically
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Flush pending writes to durable storage, if any
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        // Single write guard for the whole batch
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// sled-backed persistent store
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(&path)?;
        tracing::info!("Opened persistent store at {:?}", path.as_ref());
        Ok(Self { db })
    }
}

impl KvStore for SledKv {
    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.db.contains_key(key)?)
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => sled_batch.insert(key, value),
                BatchOp::Delete(key) => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(kv: &dyn KvStore) {
        assert!(!kv.has(b"a").unwrap());
        kv.put(b"a", b"1").unwrap();
        assert!(kv.has(b"a").unwrap());
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));

        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());
        batch.delete(b"never-written".to_vec());
        kv.write_batch(batch).unwrap();

        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_memory_backend() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn test_sled_backend() {
        let dir = tempdir().unwrap();
        let kv = SledKv::open(dir.path()).unwrap();
        exercise(&kv);
        kv.flush().unwrap();
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let kv = SledKv::open(dir.path()).unwrap();
            kv.put(b"head", &[7u8; 32]).unwrap();
            kv.flush().unwrap();
        }

        let kv = SledKv::open(dir.path()).unwrap();
        assert_eq!(kv.get(b"head").unwrap(), Some(vec![7u8; 32]));
    }
}
