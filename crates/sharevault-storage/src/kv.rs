//! Key-value index over redb.
//!
//! One ordered table serves both the share index and the recipe index; a
//! one-byte key prefix partitions the key space. Writes accumulate in a
//! batch and hit the store in a single transaction when the batch runs
//! over its configured size or when [`KvIndex::batch_flush`] is called
//! (the backend triggers that after every completed recipe to bound the
//! loss window). Reads consult the pending batch first so a
//! read-modify-write inside one batch window never observes a stale
//! committed value.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use sharevault_proto::IndexKey;

use crate::error::{StorageError, StorageResult};

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index");

struct WriteBatch {
    pending: HashMap<IndexKey, Vec<u8>>,
    count: usize,
}

/// Thin wrapper over the ordered KV engine with batched writes.
pub struct KvIndex {
    db: Database,
    batch: Mutex<WriteBatch>,
    batch_size: usize,
}

impl KvIndex {
    /// Open (or create) the store at `path`. A `batch_size` of zero
    /// disables batching; every put commits immediately.
    pub fn open(path: &Path, batch_size: usize) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(INDEX_TABLE)?;
        }
        txn.commit()?;
        Ok(KvIndex {
            db,
            batch: Mutex::new(WriteBatch {
                pending: HashMap::new(),
                count: 0,
            }),
            batch_size,
        })
    }

    /// Point lookup. Pending batched writes shadow committed values.
    pub fn get(&self, key: &IndexKey) -> StorageResult<Option<Vec<u8>>> {
        {
            let batch = self
                .batch
                .lock()
                .map_err(|_| StorageError::Poisoned { what: "kv batch" })?;
            if let Some(value) = batch.pending.get(key) {
                return Ok(Some(value.clone()));
            }
        }
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INDEX_TABLE)?;
        let value = table.get(key.as_bytes().as_slice())?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Point write. Last writer wins per key.
    pub fn put(&self, key: IndexKey, value: Vec<u8>) -> StorageResult<()> {
        if self.batch_size == 0 {
            let txn = self.db.begin_write()?;
            {
                let mut table = txn.open_table(INDEX_TABLE)?;
                table.insert(key.as_bytes().as_slice(), value.as_slice())?;
            }
            txn.commit()?;
            return Ok(());
        }

        let mut batch = self
            .batch
            .lock()
            .map_err(|_| StorageError::Poisoned { what: "kv batch" })?;
        batch.pending.insert(key, value);
        batch.count += 1;
        if batch.count > self.batch_size {
            self.flush_locked(&mut batch)?;
        }
        Ok(())
    }

    /// Commit everything in the pending batch.
    pub fn batch_flush(&self) -> StorageResult<()> {
        if self.batch_size == 0 {
            return Ok(());
        }
        let mut batch = self
            .batch
            .lock()
            .map_err(|_| StorageError::Poisoned { what: "kv batch" })?;
        self.flush_locked(&mut batch)
    }

    fn flush_locked(&self, batch: &mut WriteBatch) -> StorageResult<()> {
        if batch.pending.is_empty() {
            batch.count = 0;
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(INDEX_TABLE)?;
            for (key, value) in batch.pending.iter() {
                table.insert(key.as_bytes().as_slice(), value.as_slice())?;
            }
        }
        txn.commit()?;
        debug!(entries = batch.pending.len(), writes = batch.count, "flushed kv batch");
        batch.pending.clear();
        batch.count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharevault_proto::{Fingerprint, KeyPrefix};
    use tempfile::tempdir;

    fn key(prefix: KeyPrefix, byte: u8) -> IndexKey {
        IndexKey::new(prefix, &Fingerprint([byte; 32]))
    }

    #[test]
    fn get_sees_pending_batch() {
        let dir = tempdir().unwrap();
        let kv = KvIndex::open(&dir.path().join("index.redb"), 512).unwrap();

        let k = key(KeyPrefix::ShareIndex, 1);
        assert_eq!(kv.get(&k).unwrap(), None);

        kv.put(k, b"v1".to_vec()).unwrap();
        // still in the batch, not yet committed, but visible
        assert_eq!(kv.get(&k).unwrap(), Some(b"v1".to_vec()));

        kv.put(k, b"v2".to_vec()).unwrap();
        assert_eq!(kv.get(&k).unwrap(), Some(b"v2".to_vec()));

        kv.batch_flush().unwrap();
        assert_eq!(kv.get(&k).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn batch_flushes_when_full() {
        let dir = tempdir().unwrap();
        let kv = KvIndex::open(&dir.path().join("index.redb"), 4).unwrap();

        for i in 0..6u8 {
            kv.put(key(KeyPrefix::ShareIndex, i), vec![i]).unwrap();
        }
        // the first five puts tripped the flush threshold
        let batch = kv.batch.lock().unwrap();
        assert!(batch.count < 5);
        drop(batch);

        for i in 0..6u8 {
            assert_eq!(kv.get(&key(KeyPrefix::ShareIndex, i)).unwrap(), Some(vec![i]));
        }
    }

    #[test]
    fn unbatched_writes_commit_immediately() {
        let dir = tempdir().unwrap();
        let kv = KvIndex::open(&dir.path().join("index.redb"), 0).unwrap();
        let k = key(KeyPrefix::Recipe, 9);
        kv.put(k, b"recipe".to_vec()).unwrap();
        assert_eq!(kv.get(&k).unwrap(), Some(b"recipe".to_vec()));
    }

    #[test]
    fn prefixes_partition_the_key_space() {
        let dir = tempdir().unwrap();
        let kv = KvIndex::open(&dir.path().join("index.redb"), 0).unwrap();
        let share = key(KeyPrefix::ShareIndex, 7);
        let recipe = key(KeyPrefix::Recipe, 7);
        kv.put(share, b"share".to_vec()).unwrap();
        assert_eq!(kv.get(&share).unwrap(), Some(b"share".to_vec()));
        assert_eq!(kv.get(&recipe).unwrap(), None);
    }
}
