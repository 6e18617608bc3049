//! Backend facade.
//!
//! Owns every piece of process-wide storage state: the name dispenser, the
//! single writable container, the read-container LRU, the KV index and the
//! recipe store. One `Backend` value is built at startup and threaded
//! through the dedup engine.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, info};

use sharevault_proto::{
    ContainerName, FileRecipeEntry, FileShareMetaHead, IndexKey, UserId,
};

use crate::container::{ReadContainer, WritableContainer};
use crate::dispenser::NameDispenser;
use crate::error::{StorageError, StorageResult};
use crate::kv::KvIndex;
use crate::recipe::RecipeStore;

/// Tunables of the storage backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory holding the KV store.
    pub db_dir: PathBuf,
    /// Directory holding container and recipe files.
    pub container_dir: PathBuf,
    /// Fixed size of every container file.
    pub container_size: usize,
    /// Capacity of the read-container LRU.
    pub container_cache_size: usize,
    /// Capacity of the recipe LRU.
    pub recipe_cache_size: usize,
    /// KV write batch size; zero disables batching.
    pub batch_size: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            db_dir: PathBuf::from("./meta/DedupDB/"),
            container_dir: PathBuf::from("./meta/Container/"),
            container_size: 256 << 10,
            container_cache_size: 32 * 1024,
            recipe_cache_size: 3,
            batch_size: 512,
        }
    }
}

struct ShareWriter {
    container: WritableContainer,
    name: ContainerName,
    offset: usize,
}

/// The storage backend: containers, KV index and recipes behind one facade.
pub struct Backend {
    config: BackendConfig,
    kv: KvIndex,
    recipes: RecipeStore,
    dispenser: NameDispenser,
    writer: Mutex<ShareWriter>,
    read_cache: Mutex<LruCache<ContainerName, Arc<ReadContainer>>>,
}

impl Backend {
    /// Open the backend, creating the KV store and the first writable
    /// container. Both directories must already exist.
    pub fn open(config: BackendConfig) -> StorageResult<Self> {
        let kv = KvIndex::open(&config.db_dir.join("index.redb"), config.batch_size)?;
        let recipes = RecipeStore::new(config.container_dir.clone(), config.recipe_cache_size);
        let dispenser = NameDispenser::new();

        let name = dispenser.get()?;
        let container =
            WritableContainer::create(&config.container_dir, &name, config.container_size)?;
        info!(container = %name, size = config.container_size, "backend open");

        let cache_capacity = NonZeroUsize::new(config.container_cache_size)
            .unwrap_or(NonZeroUsize::new(1).unwrap());
        Ok(Backend {
            kv,
            recipes,
            dispenser,
            writer: Mutex::new(ShareWriter {
                container,
                name,
                offset: 0,
            }),
            read_cache: Mutex::new(LruCache::new(cache_capacity)),
            config,
        })
    }

    /// Append a share or delta payload to the writable container, sealing
    /// it and allocating a fresh one first if the payload does not fit in
    /// the remaining space. A payload is never split across containers.
    pub fn put_share_data(&self, data: &[u8]) -> StorageResult<(ContainerName, u64)> {
        if data.len() > self.config.container_size {
            return Err(StorageError::OversizedPayload {
                len: data.len(),
                container_size: self.config.container_size,
            });
        }
        let mut writer = self.writer.lock().map_err(|_| StorageError::Poisoned {
            what: "writable container",
        })?;
        if writer.offset + data.len() > writer.container.size() {
            let name = self.dispenser.get()?;
            let container = WritableContainer::create(
                &self.config.container_dir,
                &name,
                self.config.container_size,
            )?;
            debug!(sealed = %writer.name, fresh = %name, "container rollover");
            writer.container = container;
            writer.name = name;
            writer.offset = 0;
        }
        let name = writer.name;
        let offset = writer.offset;
        writer.container.write_at(&name, offset, data)?;
        writer.offset += data.len();
        Ok((name, offset as u64))
    }

    /// Copy `out.len()` payload bytes from `(container_name, offset)`.
    /// Opens the container and inserts it into the read LRU on a miss.
    pub fn get_share_data(
        &self,
        name: &ContainerName,
        offset: u64,
        out: &mut [u8],
    ) -> StorageResult<()> {
        let container = {
            let mut cache = self.read_cache.lock().map_err(|_| StorageError::Poisoned {
                what: "read container cache",
            })?;
            match cache.get(name) {
                Some(container) => Arc::clone(container),
                None => {
                    let container =
                        Arc::new(ReadContainer::open(&self.config.container_dir, name)?);
                    cache.put(*name, Arc::clone(&container));
                    container
                }
            }
        };
        // the Arc keeps the mapping alive past eviction, so the copy runs
        // outside the cache lock
        container.read_at(name, offset, out)
    }

    /// Point lookup in the KV index.
    pub fn get_index(&self, key: &IndexKey) -> StorageResult<Option<Vec<u8>>> {
        self.kv.get(key)
    }

    /// Point write to the KV index.
    pub fn put_index(&self, key: IndexKey, value: Vec<u8>) -> StorageResult<()> {
        self.kv.put(key, value)
    }

    /// Commit the pending KV batch.
    pub fn batch_flush(&self) -> StorageResult<()> {
        self.kv.batch_flush()
    }

    /// Record one recipe fragment's entries. See [`RecipeStore::put_fragment`].
    pub fn put_recipe_fragment(
        &self,
        user_id: UserId,
        key: &IndexKey,
        meta_head: &FileShareMetaHead,
        total_shares: usize,
        entries: &[FileRecipeEntry],
    ) -> StorageResult<()> {
        self.recipes
            .put_fragment(user_id, key, meta_head, total_shares, entries)
    }

    /// Close out one fragment: bump the recipe's share count, persist it if
    /// complete, and flush the KV batch to bound the loss window.
    pub fn finish_recipe_file(
        &self,
        key: &IndexKey,
        meta_head: &FileShareMetaHead,
    ) -> StorageResult<()> {
        self.recipes.finish(key, meta_head.num_of_coming_secrets)?;
        self.kv.batch_flush()
    }

    /// Fetch a finished recipe from the LRU or from disk.
    pub fn get_recipe_data(&self, key: &IndexKey) -> StorageResult<Arc<Vec<u8>>> {
        self.recipes.get(key)
    }

    /// The configured container size.
    pub fn container_size(&self) -> usize {
        self.config.container_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_backend(container_size: usize) -> (tempfile::TempDir, Backend) {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let container_dir = dir.path().join("containers");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::create_dir_all(&container_dir).unwrap();
        let backend = Backend::open(BackendConfig {
            db_dir,
            container_dir,
            container_size,
            container_cache_size: 4,
            recipe_cache_size: 3,
            batch_size: 8,
        })
        .unwrap();
        (dir, backend)
    }

    #[test]
    fn append_and_read_back() {
        let (_dir, backend) = test_backend(1024);
        let (name_a, off_a) = backend.put_share_data(b"first payload").unwrap();
        let (name_b, off_b) = backend.put_share_data(b"second").unwrap();
        assert_eq!(name_a, name_b);
        assert_eq!(off_a, 0);
        assert_eq!(off_b, 13);

        let mut out = vec![0u8; 13];
        backend.get_share_data(&name_a, off_a, &mut out).unwrap();
        assert_eq!(&out, b"first payload");
        let mut out = vec![0u8; 6];
        backend.get_share_data(&name_b, off_b, &mut out).unwrap();
        assert_eq!(&out, b"second");
    }

    #[test]
    fn rollover_allocates_a_new_container_at_offset_zero() {
        let (_dir, backend) = test_backend(64);
        let (name_a, _) = backend.put_share_data(&[1u8; 40]).unwrap();
        // does not fit in the remaining 24 bytes
        let (name_b, off_b) = backend.put_share_data(&[2u8; 40]).unwrap();
        assert_ne!(name_a, name_b);
        assert_eq!(off_b, 0);

        let mut out = vec![0u8; 40];
        backend.get_share_data(&name_b, 0, &mut out).unwrap();
        assert_eq!(out, vec![2u8; 40]);
        // the sealed container still serves its bytes
        backend.get_share_data(&name_a, 0, &mut out).unwrap();
        assert_eq!(out, vec![1u8; 40]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (_dir, backend) = test_backend(64);
        assert!(matches!(
            backend.put_share_data(&[0u8; 65]),
            Err(StorageError::OversizedPayload { .. })
        ));
    }

    #[test]
    fn offsets_are_monotonic_per_container() {
        let (_dir, backend) = test_backend(1024);
        let mut last = None;
        for _ in 0..8 {
            let (name, offset) = backend.put_share_data(&[0u8; 100]).unwrap();
            if let Some((prev_name, prev_off)) = last {
                if name == prev_name {
                    assert!(offset > prev_off);
                }
            }
            last = Some((name, offset));
        }
    }
}
