//! Similarity index.
//!
//! Three maps from a 64-bit super-feature to the fingerprint of a share
//! carrying it, one per feature slot. Lookup probes the slots in order and
//! returns the first hit; insert overwrites all three entries, last writer
//! wins. The index is in-memory only and never invalidated: a stale hit
//! costs the caller one wasted base fetch and encode attempt, after which
//! it falls back to the unique-store path.

use std::collections::HashMap;
use std::sync::RwLock;

use sharevault_proto::Fingerprint;

use crate::features::SuperFeatures;

/// Super-feature to base-candidate mapping.
pub struct SimilarityIndex {
    sf1: RwLock<HashMap<u64, Fingerprint>>,
    sf2: RwLock<HashMap<u64, Fingerprint>>,
    sf3: RwLock<HashMap<u64, Fingerprint>>,
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        SimilarityIndex {
            sf1: RwLock::new(HashMap::new()),
            sf2: RwLock::new(HashMap::new()),
            sf3: RwLock::new(HashMap::new()),
        }
    }

    /// Return the fingerprint of a plausible delta base: the first slot map
    /// with an entry for its feature, probed in slot order. The hit is not
    /// verified against the KV store; the caller handles stale results.
    pub fn lookup(&self, features: &SuperFeatures) -> Option<Fingerprint> {
        if let Some(fp) = self.sf1.read().unwrap().get(&features.sf1) {
            return Some(*fp);
        }
        if let Some(fp) = self.sf2.read().unwrap().get(&features.sf2) {
            return Some(*fp);
        }
        if let Some(fp) = self.sf3.read().unwrap().get(&features.sf3) {
            return Some(*fp);
        }
        None
    }

    /// Register a stored share as a future base candidate under all three
    /// of its features.
    pub fn insert(&self, features: &SuperFeatures, fp: Fingerprint) {
        self.sf1.write().unwrap().insert(features.sf1, fp);
        self.sf2.write().unwrap().insert(features.sf2, fp);
        self.sf3.write().unwrap().insert(features.sf3, fp);
    }
}
