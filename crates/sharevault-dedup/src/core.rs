//! The dedup engine.
//!
//! Upload runs in two stages. The first stage answers, per coming share,
//! whether this user already owns it; the client then omits the payload
//! bytes of owned shares from the data packet. The second stage walks the
//! remaining payloads: a share someone else already stored just gains a
//! user reference, a share with a plausible similar base is stored as a
//! delta against it, anything else is stored raw. Every share lands in the
//! file's recipe either way, and a finished recipe is what download
//! replays, restoring delta shares recursively through their base chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use sharevault_proto::{
    FileRecipeEntry, Fingerprint, IndexKey, KeyPrefix, ProtoError, ShareEntry, ShareFileHead,
    ShareIndexHead, ShareIndexValue, ShareMeta, UserId, SHARE_ENTRY_SIZE, SHARE_FILE_HEAD_SIZE,
};
use sharevault_storage::Backend;

use crate::delta;
use crate::error::{DedupError, DedupResult};
use crate::features::super_features;
use crate::fingerprint::{format_full_file_name, recipe_fingerprint};
use crate::mediator::{PeerMediator, Route};
use crate::similarity::SimilarityIndex;

/// Tunables of the dedup engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Longest allowed delta chain below a share.
    pub max_delta_depth: u8,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig { max_delta_depth: 1 }
    }
}

#[derive(Debug, Default)]
struct Counters {
    unique_shares: AtomicU64,
    unique_bytes: AtomicU64,
    duplicate_shares: AtomicU64,
    duplicate_bytes: AtomicU64,
    delta_shares: AtomicU64,
    delta_bytes_in: AtomicU64,
    delta_bytes_stored: AtomicU64,
}

/// Point-in-time snapshot of the engine counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStats {
    /// Shares stored raw.
    pub unique_shares: u64,
    /// Bytes of those shares.
    pub unique_bytes: u64,
    /// Shares answered by an existing index entry.
    pub duplicate_shares: u64,
    /// Bytes of those shares.
    pub duplicate_bytes: u64,
    /// Shares stored as deltas.
    pub delta_shares: u64,
    /// Logical bytes of the delta-stored shares.
    pub delta_bytes_in: u64,
    /// Bytes actually written for them.
    pub delta_bytes_stored: u64,
}

/// The dedup engine: two-stage upload pipeline and recursive restore over
/// one storage backend.
pub struct DedupCore {
    backend: Backend,
    similarity: SimilarityIndex,
    mediator: PeerMediator,
    // serializes every share-index read-modify-write; without it two
    // sessions appending user refs to the same fingerprint lose updates
    index_update: Mutex<()>,
    counters: Counters,
    max_delta_depth: u8,
}

impl DedupCore {
    /// Build the engine on top of an opened backend.
    pub fn new(backend: Backend, config: DedupConfig) -> Self {
        DedupCore {
            backend,
            similarity: SimilarityIndex::new(),
            mediator: PeerMediator::new(),
            index_update: Mutex::new(()),
            counters: Counters::default(),
            max_delta_depth: config.max_delta_depth,
        }
    }

    /// The backend this engine writes through.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Snapshot the engine counters.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            unique_shares: self.counters.unique_shares.load(Ordering::Relaxed),
            unique_bytes: self.counters.unique_bytes.load(Ordering::Relaxed),
            duplicate_shares: self.counters.duplicate_shares.load(Ordering::Relaxed),
            duplicate_bytes: self.counters.duplicate_bytes.load(Ordering::Relaxed),
            delta_shares: self.counters.delta_shares.load(Ordering::Relaxed),
            delta_bytes_in: self.counters.delta_bytes_in.load(Ordering::Relaxed),
            delta_bytes_stored: self.counters.delta_bytes_stored.load(Ordering::Relaxed),
        }
    }

    /// First stage: answer, per coming share, whether `user_id` already
    /// owns it.
    pub fn first_stage_dedup(&self, user_id: UserId, share_meta: &[u8]) -> DedupResult<Vec<bool>> {
        let meta = ShareMeta::parse(share_meta)?;
        let mut dup_status = Vec::with_capacity(meta.entries.len());
        for entry in &meta.entries {
            let owned = match self.mediator.route(&entry.share_fp) {
                Route::Local => self.intra_user_index_update(&entry.share_fp, user_id)?,
                Route::Peer(_) => {
                    return Err(DedupError::PeerUnavailable {
                        op: "intra-user index update",
                        fp_hex: entry.share_fp.to_hex(),
                    })
                }
            };
            dup_status.push(owned);
        }
        trace!(
            user_id,
            shares = dup_status.len(),
            owned = dup_status.iter().filter(|d| **d).count(),
            "first stage complete"
        );
        Ok(dup_status)
    }

    /// True iff the share index for `fp` exists and `user_id` appears in
    /// its reference list.
    pub fn intra_user_index_update(&self, fp: &Fingerprint, user_id: UserId) -> DedupResult<bool> {
        let key = IndexKey::new(KeyPrefix::ShareIndex, fp);
        match self.backend.get_index(&key)? {
            None => Ok(false),
            Some(bytes) => {
                let value = ShareIndexValue::parse(&bytes)?;
                Ok(value.contains_user(user_id))
            }
        }
    }

    /// Second stage: store the fragment's shares and extend the file's
    /// recipe.
    ///
    /// `share_data` carries the payloads of the non-duplicate shares only,
    /// concatenated in metadata order; the cursor advances only on the
    /// non-duplicate branch. The payload length must match the sum of the
    /// non-duplicate share sizes exactly.
    pub fn second_stage_dedup(
        &self,
        user_id: UserId,
        share_meta: &[u8],
        share_data: &[u8],
        dup_status: &[bool],
        total_shares: usize,
    ) -> DedupResult<()> {
        let meta = ShareMeta::parse(share_meta)?;
        if dup_status.len() != meta.entries.len() {
            return Err(DedupError::Proto(ProtoError::CountMismatch {
                what: "dup status",
                declared: meta.entries.len(),
                actual: dup_status.len(),
            }));
        }

        let expected: u64 = meta
            .entries
            .iter()
            .zip(dup_status)
            .filter(|(_, dup)| !**dup)
            .map(|(entry, _)| entry.share_size as u64)
            .sum();
        if expected != share_data.len() as u64 {
            return Err(DedupError::Proto(ProtoError::PayloadSizeMismatch {
                expected,
                actual: share_data.len() as u64,
            }));
        }

        let full_file_name = format_full_file_name(meta.full_file_name)?;
        let recipe_fp = recipe_fingerprint(&full_file_name, user_id);
        let recipe_key = IndexKey::new(KeyPrefix::Recipe, &recipe_fp);

        let recipe_entries: Vec<FileRecipeEntry> = meta
            .entries
            .iter()
            .map(|entry| FileRecipeEntry {
                share_fp: entry.share_fp,
                secret_id: entry.secret_id,
                secret_size: entry.secret_size,
                share_size: entry.share_size,
            })
            .collect();
        self.backend.put_recipe_fragment(
            user_id,
            &recipe_key,
            &meta.head,
            total_shares,
            &recipe_entries,
        )?;

        let mut offset = 0usize;
        for (entry, dup) in meta.entries.iter().zip(dup_status) {
            if *dup {
                // the client did not transmit this payload
                self.count_duplicate(entry.share_size as u64);
                continue;
            }
            let len = entry.share_size as usize;
            let payload = &share_data[offset..offset + len];
            match self.mediator.route(&entry.share_fp) {
                Route::Local => self.inter_user_index_update(&entry.share_fp, user_id, payload)?,
                Route::Peer(_) => {
                    return Err(DedupError::PeerUnavailable {
                        op: "inter-user index update",
                        fp_hex: entry.share_fp.to_hex(),
                    })
                }
            }
            offset += len;
        }

        self.backend.finish_recipe_file(&recipe_key, &meta.head)?;
        debug!(
            user_id,
            file = %full_file_name,
            coming = meta.entries.len(),
            total_shares,
            "second stage complete"
        );
        Ok(())
    }

    /// Store one share for `user_id`, deduplicating against every user.
    ///
    /// An existing index entry only gains a user reference. A new share is
    /// stored as a delta when the similarity index proposes a base that
    /// still exists, sits above a short enough chain, and actually yields a
    /// smaller payload; otherwise it is stored raw.
    pub fn inter_user_index_update(
        &self,
        fp: &Fingerprint,
        user_id: UserId,
        share_data: &[u8],
    ) -> DedupResult<()> {
        let key = IndexKey::new(KeyPrefix::ShareIndex, fp);
        let _guard = self
            .index_update
            .lock()
            .map_err(|_| sharevault_storage::StorageError::Poisoned {
                what: "index update",
            })?;

        if let Some(bytes) = self.backend.get_index(&key)? {
            // the share exists; the first stage does not dedup within one
            // incoming batch, so the user may already be listed
            let mut value = ShareIndexValue::parse(&bytes)?;
            if !value.contains_user(user_id) {
                value.push_user(user_id);
                self.backend.put_index(key, value.to_bytes())?;
            }
            self.count_duplicate(share_data.len() as u64);
            return Ok(());
        }

        let features = super_features(share_data);

        if let Some(base_fp) = self.similarity.lookup(&features) {
            if let Some(stored) = self.try_delta_store(fp, user_id, share_data, &base_fp)? {
                self.similarity.insert(&features, *fp);
                self.counters.delta_shares.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .delta_bytes_in
                    .fetch_add(share_data.len() as u64, Ordering::Relaxed);
                self.counters
                    .delta_bytes_stored
                    .fetch_add(stored, Ordering::Relaxed);
                return Ok(());
            }
        }

        // unique share, stored raw
        let (container_name, offset) = self.backend.put_share_data(share_data)?;
        let head = ShareIndexHead {
            share_size: to_i32(share_data.len())?,
            num_of_users: 1,
            delta_depth: 0,
            delta_size: 0,
            base_fp: Fingerprint::ZERO,
            container_name,
            offset,
        };
        self.backend
            .put_index(key, ShareIndexValue::new(head, user_id).to_bytes())?;
        self.similarity.insert(&features, *fp);
        self.counters.unique_shares.fetch_add(1, Ordering::Relaxed);
        self.counters
            .unique_bytes
            .fetch_add(share_data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Attempt the delta path against `base_fp`. Returns the stored delta
    /// size on success, `None` when the base is stale, its chain is at the
    /// depth bound, or encoding yields no gain.
    fn try_delta_store(
        &self,
        fp: &Fingerprint,
        user_id: UserId,
        share_data: &[u8],
        base_fp: &Fingerprint,
    ) -> DedupResult<Option<u64>> {
        let base_key = IndexKey::new(KeyPrefix::ShareIndex, base_fp);
        let Some(base_bytes) = self.backend.get_index(&base_key)? else {
            // stale similarity entry
            return Ok(None);
        };
        let base_value = ShareIndexValue::parse(&base_bytes)?;
        if base_value.head.delta_depth >= self.max_delta_depth {
            return Ok(None);
        }

        let mut base = vec![0u8; base_value.head.share_size as usize];
        if base_value.head.delta_depth == 0 {
            self.backend.get_share_data(
                &base_value.head.container_name,
                base_value.head.offset,
                &mut base,
            )?;
        } else {
            self.restore_delta_share(&base_value.head, &mut base)?;
        }

        let Some(delta_bytes) = delta::encode(&base, share_data) else {
            return Ok(None);
        };

        let (container_name, offset) = self.backend.put_share_data(&delta_bytes)?;
        let head = ShareIndexHead {
            share_size: to_i32(share_data.len())?,
            num_of_users: 1,
            delta_depth: base_value.head.delta_depth + 1,
            delta_size: delta_bytes.len() as u64,
            base_fp: *base_fp,
            container_name,
            offset,
        };
        let key = IndexKey::new(KeyPrefix::ShareIndex, fp);
        self.backend
            .put_index(key, ShareIndexValue::new(head, user_id).to_bytes())?;
        trace!(
            fp = %fp,
            base = %base_fp,
            depth = head.delta_depth,
            delta = delta_bytes.len(),
            logical = share_data.len(),
            "share stored as delta"
        );
        Ok(Some(delta_bytes.len() as u64))
    }

    /// Restore a whole file into `buf`, invoking `flush` with each filled
    /// chunk. The emitted byte stream is `ShareFileHead ‖ (ShareEntry ‖
    /// share bytes)…` across all flushes concatenated.
    pub fn restore_share_file(
        &self,
        user_id: UserId,
        full_file_name: &str,
        buf: &mut [u8],
        flush: &mut dyn FnMut(&[u8]) -> DedupResult<()>,
    ) -> DedupResult<()> {
        let full_file_name = format_full_file_name(full_file_name)?;
        let recipe_fp = recipe_fingerprint(&full_file_name, user_id);
        let recipe_key = IndexKey::new(KeyPrefix::Recipe, &recipe_fp);
        let recipe_bytes = self.backend.get_recipe_data(&recipe_key)?;
        let (head, entries) = FileRecipeEntry::parse_recipe(&recipe_bytes)?;

        let mut cursor = 0usize;
        let file_head = ShareFileHead {
            file_size: head.file_size,
            num_of_shares: head.num_of_shares,
        };
        buf[cursor..cursor + SHARE_FILE_HEAD_SIZE].copy_from_slice(&file_head.to_bytes());
        cursor += SHARE_FILE_HEAD_SIZE;

        for entry in &entries {
            let share_size = entry.share_size as usize;
            let piece = SHARE_ENTRY_SIZE + share_size;
            if piece >= buf.len() {
                return Err(DedupError::Proto(ProtoError::PacketTooLarge {
                    size: piece as u64,
                    limit: buf.len() as u64,
                }));
            }
            if cursor + piece >= buf.len() {
                flush(&buf[..cursor])?;
                cursor = 0;
            }

            let share_entry = ShareEntry {
                secret_id: entry.secret_id,
                secret_size: entry.secret_size,
                share_size: entry.share_size,
            };
            buf[cursor..cursor + SHARE_ENTRY_SIZE].copy_from_slice(&share_entry.to_bytes());
            cursor += SHARE_ENTRY_SIZE;

            match self.mediator.route(&entry.share_fp) {
                Route::Local => {
                    self.restore_share(&entry.share_fp, &mut buf[cursor..cursor + share_size])?
                }
                Route::Peer(_) => {
                    return Err(DedupError::PeerUnavailable {
                        op: "restore share",
                        fp_hex: entry.share_fp.to_hex(),
                    })
                }
            }
            cursor += share_size;
        }

        if cursor > 0 {
            flush(&buf[..cursor])?;
        }
        debug!(user_id, file = %full_file_name, shares = entries.len(), "restore complete");
        Ok(())
    }

    /// Restore one share into `out`, whose length must equal the share's
    /// logical size.
    pub fn restore_share(&self, fp: &Fingerprint, out: &mut [u8]) -> DedupResult<()> {
        let key = IndexKey::new(KeyPrefix::ShareIndex, fp);
        let bytes = self
            .backend
            .get_index(&key)?
            .ok_or_else(|| DedupError::ShareIndexMissing {
                fp_hex: fp.to_hex(),
            })?;
        let value = ShareIndexValue::parse(&bytes)?;

        if value.head.delta_depth > 0 {
            return self.restore_delta_share(&value.head, out);
        }
        if value.head.share_size as usize != out.len() {
            return Err(DedupError::SizeMismatch {
                expected: value.head.share_size as usize,
                actual: out.len(),
            });
        }
        self.backend
            .get_share_data(&value.head.container_name, value.head.offset, out)?;
        Ok(())
    }

    /// Restore a delta-stored share by walking its base chain. Terminates
    /// because every base's depth is strictly smaller and depth zero is
    /// raw-stored.
    fn restore_delta_share(&self, head: &ShareIndexHead, out: &mut [u8]) -> DedupResult<()> {
        let base_key = IndexKey::new(KeyPrefix::ShareIndex, &head.base_fp);
        let base_bytes =
            self.backend
                .get_index(&base_key)?
                .ok_or_else(|| DedupError::BaseIndexMissing {
                    fp_hex: head.base_fp.to_hex(),
                })?;
        let base_value = ShareIndexValue::parse(&base_bytes)?;

        let mut base = vec![0u8; base_value.head.share_size as usize];
        if base_value.head.delta_depth == 0 {
            self.backend.get_share_data(
                &base_value.head.container_name,
                base_value.head.offset,
                &mut base,
            )?;
        } else {
            self.restore_delta_share(&base_value.head, &mut base)?;
        }

        let mut delta_bytes = vec![0u8; head.delta_size as usize];
        self.backend
            .get_share_data(&head.container_name, head.offset, &mut delta_bytes)?;

        let restored = delta::decode(&base, &delta_bytes, head.share_size as usize).ok_or_else(
            || DedupError::DeltaCorrupt {
                container: head.container_name.to_string(),
                offset: head.offset,
            },
        )?;
        if restored.len() != out.len() {
            return Err(DedupError::SizeMismatch {
                expected: out.len(),
                actual: restored.len(),
            });
        }
        out.copy_from_slice(&restored);
        Ok(())
    }

    fn count_duplicate(&self, bytes: u64) {
        self.counters.duplicate_shares.fetch_add(1, Ordering::Relaxed);
        self.counters.duplicate_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

fn to_i32(len: usize) -> DedupResult<i32> {
    i32::try_from(len).map_err(|_| {
        DedupError::SizeMismatch {
            expected: i32::MAX as usize,
            actual: len,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharevault_storage::BackendConfig;
    use tempfile::tempdir;

    fn engine(dir: &std::path::Path, container_size: usize) -> DedupCore {
        let db_dir = dir.join("db");
        let container_dir = dir.join("containers");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::create_dir_all(&container_dir).unwrap();
        let backend = Backend::open(BackendConfig {
            db_dir,
            container_dir,
            container_size,
            container_cache_size: 8,
            recipe_cache_size: 3,
            batch_size: 16,
        })
        .unwrap();
        DedupCore::new(backend, DedupConfig::default())
    }

    fn payload(len: usize, modulus: u8) -> Vec<u8> {
        (0..len).map(|i| (i % modulus as usize) as u8).collect()
    }

    #[test]
    fn store_and_restore_raw_share() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);
        let data = payload(4096, 251);
        let fp = crate::fingerprint::share_fingerprint(&data);

        core.inter_user_index_update(&fp, 1, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        core.restore_share(&fp, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(core.stats().unique_shares, 1);
    }

    #[test]
    fn second_user_appends_a_reference() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);
        let data = payload(4096, 251);
        let fp = crate::fingerprint::share_fingerprint(&data);

        core.inter_user_index_update(&fp, 1, &data).unwrap();
        core.inter_user_index_update(&fp, 2, &data).unwrap();
        // a repeat by the same user changes nothing
        core.inter_user_index_update(&fp, 2, &data).unwrap();

        let key = IndexKey::new(KeyPrefix::ShareIndex, &fp);
        let value = ShareIndexValue::parse(&core.backend.get_index(&key).unwrap().unwrap()).unwrap();
        assert_eq!(value.head.num_of_users, 2);
        assert_eq!(value.users, vec![1, 2]);

        assert!(core.intra_user_index_update(&fp, 1).unwrap());
        assert!(core.intra_user_index_update(&fp, 2).unwrap());
        assert!(!core.intra_user_index_update(&fp, 3).unwrap());
    }

    #[test]
    fn similar_share_is_delta_stored_and_restores() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);

        let base_data = payload(8192, 251);
        let base_fp = crate::fingerprint::share_fingerprint(&base_data);
        core.inter_user_index_update(&base_fp, 1, &base_data).unwrap();

        // same content profile, a few point edits
        let mut similar = base_data.clone();
        similar[10] ^= 0x01;
        let similar_fp = crate::fingerprint::share_fingerprint(&similar);
        core.inter_user_index_update(&similar_fp, 1, &similar).unwrap();

        let key = IndexKey::new(KeyPrefix::ShareIndex, &similar_fp);
        let value = ShareIndexValue::parse(&core.backend.get_index(&key).unwrap().unwrap()).unwrap();
        assert_eq!(value.head.delta_depth, 1);
        assert_eq!(value.head.base_fp, base_fp);
        assert!(value.head.delta_size < similar.len() as u64);
        assert_eq!(core.stats().delta_shares, 1);

        let mut out = vec![0u8; similar.len()];
        core.restore_share(&similar_fp, &mut out).unwrap();
        assert_eq!(out, similar);
    }

    #[test]
    fn delta_chain_depth_is_bounded() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);

        let base_data = payload(8192, 251);
        let base_fp = crate::fingerprint::share_fingerprint(&base_data);
        core.inter_user_index_update(&base_fp, 1, &base_data).unwrap();

        let mut first = base_data.clone();
        first[0] ^= 0xff;
        let first_fp = crate::fingerprint::share_fingerprint(&first);
        core.inter_user_index_update(&first_fp, 1, &first).unwrap();

        // the similarity index now proposes `first` (depth 1) as base;
        // with the default bound of 1 the third share must store raw
        let mut second = first.clone();
        second[1] ^= 0xff;
        let second_fp = crate::fingerprint::share_fingerprint(&second);
        core.inter_user_index_update(&second_fp, 1, &second).unwrap();

        let key = IndexKey::new(KeyPrefix::ShareIndex, &second_fp);
        let value = ShareIndexValue::parse(&core.backend.get_index(&key).unwrap().unwrap()).unwrap();
        assert!(value.head.delta_depth <= 1);

        let mut out = vec![0u8; second.len()];
        core.restore_share(&second_fp, &mut out).unwrap();
        assert_eq!(out, second);
    }

    #[test]
    fn small_share_is_never_delta_compressed() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);

        let base_data = payload(2048, 251);
        let base_fp = crate::fingerprint::share_fingerprint(&base_data);
        core.inter_user_index_update(&base_fp, 1, &base_data).unwrap();

        let small = payload(256, 251);
        let small_fp = crate::fingerprint::share_fingerprint(&small);
        core.inter_user_index_update(&small_fp, 1, &small).unwrap();

        let key = IndexKey::new(KeyPrefix::ShareIndex, &small_fp);
        let value = ShareIndexValue::parse(&core.backend.get_index(&key).unwrap().unwrap()).unwrap();
        assert_eq!(value.head.delta_depth, 0);
    }

    #[test]
    fn missing_share_index_is_reported() {
        let dir = tempdir().unwrap();
        let core = engine(dir.path(), 256 << 10);
        let mut out = vec![0u8; 16];
        assert!(matches!(
            core.restore_share(&Fingerprint([7; 32]), &mut out),
            Err(DedupError::ShareIndexMissing { .. })
        ));
    }
}
