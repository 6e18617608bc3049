//! Finesse-style super-features.
//!
//! A share's similarity signature is three 64-bit super-features derived
//! deterministically from its bytes: the payload is split into twelve
//! equal sub-regions, a Rabin-like rolling polynomial slides a 48-byte
//! window across each region keeping the maximal windowed value as that
//! region's feature, and each group of four consecutive features is folded
//! with FNV-1a into one super-feature. Shares that differ in a few spots
//! tend to agree on at least one group.

use serde::{Deserialize, Serialize};

/// Rolling hash window width.
const WINDOW: usize = 48;
/// Number of super-features.
const SF_COUNT: usize = 3;
/// Features folded into each super-feature.
const GROUP: usize = 4;
/// Total sub-regions.
const REGIONS: usize = SF_COUNT * GROUP;
/// Multiplier of the rolling polynomial.
const PRIME: u64 = 0x3DA3_358B_4DC1_73;

/// Three 64-bit super-features summarizing a share's content profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuperFeatures {
    /// First-slot feature.
    pub sf1: u64,
    /// Second-slot feature.
    pub sf2: u64,
    /// Third-slot feature.
    pub sf3: u64,
}

fn fnv1a_fold(values: &[u64]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for value in values {
        for byte in value.to_le_bytes() {
            hash = (hash ^ byte as u64).wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

fn region_feature(region: &[u8]) -> u64 {
    if region.len() < WINDOW {
        // too short for a full window; fold the bytes directly
        let mut hash = 0u64;
        for &byte in region {
            hash = hash.wrapping_mul(PRIME).wrapping_add(byte as u64);
        }
        return hash;
    }
    // PRIME^(WINDOW-1), used to remove the outgoing byte
    let mut out_factor = 1u64;
    for _ in 0..WINDOW - 1 {
        out_factor = out_factor.wrapping_mul(PRIME);
    }

    let mut hash = 0u64;
    for &byte in &region[..WINDOW] {
        hash = hash.wrapping_mul(PRIME).wrapping_add(byte as u64);
    }
    let mut max = hash;
    for i in WINDOW..region.len() {
        let outgoing = (region[i - WINDOW] as u64).wrapping_mul(out_factor);
        hash = hash
            .wrapping_sub(outgoing)
            .wrapping_mul(PRIME)
            .wrapping_add(region[i] as u64);
        if hash > max {
            max = hash;
        }
    }
    max
}

/// Compute the super-features of a payload. Equal payloads always produce
/// equal features; payloads shorter than the region count produce zeroed
/// features (such shares are below the delta thresholds anyway).
pub fn super_features(data: &[u8]) -> SuperFeatures {
    if data.len() < REGIONS {
        return SuperFeatures {
            sf1: 0,
            sf2: 0,
            sf3: 0,
        };
    }
    let region_size = data.len().div_ceil(REGIONS);
    let mut features = [0u64; REGIONS];
    for (i, feature) in features.iter_mut().enumerate() {
        let start = (i * region_size).min(data.len());
        let end = ((i + 1) * region_size).min(data.len());
        *feature = region_feature(&data[start..end]);
    }
    SuperFeatures {
        sf1: fnv1a_fold(&features[0..GROUP]),
        sf2: fnv1a_fold(&features[GROUP..2 * GROUP]),
        sf3: fnv1a_fold(&features[2 * GROUP..3 * GROUP]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deterministic() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(super_features(&data), super_features(&data));
    }

    #[test]
    fn different_payloads_differ() {
        let a: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let b: Vec<u8> = (0..4096u32).map(|i| (i % 241) as u8).collect();
        assert_ne!(super_features(&a), super_features(&b));
    }

    #[test]
    fn tail_edit_keeps_leading_features() {
        let a: Vec<u8> = (0..12_000u32).map(|i| (i % 251) as u8).collect();
        let mut b = a.clone();
        let len = b.len();
        // rewrite the final region (12_000 / 12 = 1_000 bytes)
        for byte in &mut b[len - 1000..] {
            *byte ^= 0x5a;
        }
        let fa = super_features(&a);
        let fb = super_features(&b);
        // only the last region group sees the edit
        assert_eq!(fa.sf1, fb.sf1);
        assert_eq!(fa.sf2, fb.sf2);
        assert_ne!(fa.sf3, fb.sf3);
    }

    #[test]
    fn tiny_payloads_are_zeroed() {
        let sf = super_features(b"short");
        assert_eq!(sf, SuperFeatures { sf1: 0, sf2: 0, sf3: 0 });
    }

    proptest! {
        #[test]
        fn prop_deterministic(data in prop::collection::vec(0u8..=255, 0..20_000)) {
            prop_assert_eq!(super_features(&data), super_features(&data));
        }
    }
}
