//! Recipe store.
//!
//! A recipe is built up in memory while its file is still being uploaded:
//! the first fragment allocates a buffer sized for the declared total share
//! count, later fragments append their entries at the past-secrets offset,
//! and every fragment bumps the head's share count on finish. Once the
//! count reaches the declared total the buffer is written to disk as one
//! flat `<fingerprint hex>.rf` file, moved into the recipe LRU and dropped
//! from the unfinished map. Finished recipes are immutable; re-uploading a
//! file truncates and rewrites its recipe file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use sharevault_proto::{
    FileRecipeEntry, FileRecipeHead, FileShareMetaHead, IndexKey, UserId,
    FILE_RECIPE_ENTRY_SIZE, FILE_RECIPE_HEAD_SIZE,
};

use crate::error::{StorageError, StorageResult};

struct UnfinishedRecipe {
    buf: Vec<u8>,
    total_shares: usize,
}

/// In-memory unfinished recipes plus the LRU over recently finished ones.
pub struct RecipeStore {
    dir: PathBuf,
    unfinished: Mutex<HashMap<IndexKey, UnfinishedRecipe>>,
    cache: Mutex<LruCache<IndexKey, Arc<Vec<u8>>>>,
}

impl RecipeStore {
    /// Recipes are persisted under `dir`; `cache_size` bounds the LRU.
    pub fn new(dir: PathBuf, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        RecipeStore {
            dir,
            unfinished: Mutex::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn recipe_path(&self, key: &IndexKey) -> PathBuf {
        self.dir.join(format!("{}.rf", key.fingerprint_hex()))
    }

    /// Record one fragment's entries.
    ///
    /// The first fragment of a file (`num_of_past_secrets == 0`) allocates
    /// the buffer and writes the head with a share count of zero; later
    /// fragments must find their buffer already present and matching on
    /// user id and total share count. Entries land at the index given by
    /// `num_of_past_secrets`. The head count is not touched here; that is
    /// [`RecipeStore::finish`]'s job.
    pub fn put_fragment(
        &self,
        user_id: UserId,
        key: &IndexKey,
        meta_head: &FileShareMetaHead,
        total_shares: usize,
        entries: &[FileRecipeEntry],
    ) -> StorageResult<()> {
        let mut unfinished = self.unfinished.lock().map_err(|_| StorageError::Poisoned {
            what: "unfinished recipe map",
        })?;

        let recipe = if meta_head.num_of_past_secrets == 0 {
            let size = FILE_RECIPE_HEAD_SIZE + FILE_RECIPE_ENTRY_SIZE * total_shares;
            let mut buf = vec![0u8; size];
            let head = FileRecipeHead {
                user_id,
                file_size: meta_head.file_size,
                num_of_shares: 0,
            };
            buf[..FILE_RECIPE_HEAD_SIZE].copy_from_slice(&head.to_bytes());
            let fresh = UnfinishedRecipe { buf, total_shares };
            // a restarted upload replaces any stale unfinished buffer
            match unfinished.entry(*key) {
                Entry::Occupied(slot) => {
                    let slot = slot.into_mut();
                    *slot = fresh;
                    slot
                }
                Entry::Vacant(slot) => slot.insert(fresh),
            }
        } else {
            let recipe = unfinished.get_mut(key).ok_or_else(|| {
                StorageError::UnfinishedRecipeMissing {
                    key_hex: key.to_hex(),
                }
            })?;
            let head = FileRecipeHead::parse(&recipe.buf)?;
            if head.user_id != user_id {
                return Err(StorageError::RecipeHeadMismatch {
                    key_hex: key.to_hex(),
                    detail: format!("user id {} != {}", head.user_id, user_id),
                });
            }
            if recipe.total_shares != total_shares {
                return Err(StorageError::RecipeHeadMismatch {
                    key_hex: key.to_hex(),
                    detail: format!("total shares {} != {}", recipe.total_shares, total_shares),
                });
            }
            recipe
        };

        let start_index = usize::try_from(meta_head.num_of_past_secrets).unwrap_or(0);
        let end_index = start_index + entries.len();
        if end_index > recipe.total_shares {
            return Err(StorageError::RecipeHeadMismatch {
                key_hex: key.to_hex(),
                detail: format!(
                    "fragment ends at entry {} of {}",
                    end_index, recipe.total_shares
                ),
            });
        }
        let mut off = FILE_RECIPE_HEAD_SIZE + FILE_RECIPE_ENTRY_SIZE * start_index;
        for entry in entries {
            recipe.buf[off..off + FILE_RECIPE_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
            off += FILE_RECIPE_ENTRY_SIZE;
        }
        Ok(())
    }

    /// Bump the head's share count by this fragment's entry count. When the
    /// count reaches the declared total the recipe is persisted, cached and
    /// dropped from the unfinished map. Returns true when the recipe was
    /// finished by this call.
    pub fn finish(&self, key: &IndexKey, num_coming: i32) -> StorageResult<bool> {
        let mut unfinished = self.unfinished.lock().map_err(|_| StorageError::Poisoned {
            what: "unfinished recipe map",
        })?;
        let complete = {
            let recipe =
                unfinished
                    .get_mut(key)
                    .ok_or_else(|| StorageError::UnfinishedRecipeMissing {
                        key_hex: key.to_hex(),
                    })?;

            let mut head = FileRecipeHead::parse(&recipe.buf)?;
            head.num_of_shares += num_coming;
            recipe.buf[..FILE_RECIPE_HEAD_SIZE].copy_from_slice(&head.to_bytes());
            usize::try_from(head.num_of_shares).unwrap_or(0) >= recipe.total_shares
        };
        if !complete {
            return Ok(false);
        }

        let Some(recipe) = unfinished.remove(key) else {
            return Err(StorageError::UnfinishedRecipeMissing {
                key_hex: key.to_hex(),
            });
        };
        std::fs::write(self.recipe_path(key), &recipe.buf)?;
        debug!(key = %key.fingerprint_hex(), bytes = recipe.buf.len(), "recipe finished");
        let mut cache = self.cache.lock().map_err(|_| StorageError::Poisoned {
            what: "recipe cache",
        })?;
        cache.put(*key, Arc::new(recipe.buf));
        Ok(true)
    }

    /// Fetch a finished recipe: from the LRU if present, else from disk
    /// (populating the LRU).
    pub fn get(&self, key: &IndexKey) -> StorageResult<Arc<Vec<u8>>> {
        {
            let mut cache = self.cache.lock().map_err(|_| StorageError::Poisoned {
                what: "recipe cache",
            })?;
            if let Some(recipe) = cache.get(key) {
                return Ok(Arc::clone(recipe));
            }
        }
        let bytes = std::fs::read(self.recipe_path(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RecipeNotFound {
                    key_hex: key.to_hex(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        let recipe = Arc::new(bytes);
        let mut cache = self.cache.lock().map_err(|_| StorageError::Poisoned {
            what: "recipe cache",
        })?;
        cache.put(*key, Arc::clone(&recipe));
        Ok(recipe)
    }
}
