//! Delta codec.
//!
//! Encoding compresses a share against a base share using zstd dictionary
//! mode: the base is the dictionary, the share is the stream. Decoding
//! reverses it with the same dictionary. Both directions are pure functions
//! of their inputs, so `decode(base, encode(base, src), src.len()) == src`
//! whenever encode succeeds.
//!
//! Encode refuses — returns `None`, sending the caller down the
//! unique-store path — when the base is under 1 KiB, the share is under
//! 512 bytes, or the produced delta is not strictly smaller than the
//! share. Decode returns `None` unless the output length matches the
//! declared source size exactly.

use std::io::{Cursor, Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

/// Bases smaller than this never win enough to be worth a chain link.
pub const MIN_BASE_SIZE: usize = 1024;
/// Shares smaller than this are never delta-compressed.
pub const MIN_SRC_SIZE: usize = 512;

const LEVEL: i32 = 3;

/// Compute a delta of `src` against `base`, or `None` when encoding is
/// refused or yields no gain.
pub fn encode(base: &[u8], src: &[u8]) -> Option<Vec<u8>> {
    if base.len() < MIN_BASE_SIZE || src.len() < MIN_SRC_SIZE {
        return None;
    }
    let mut encoder = Encoder::with_dictionary(Vec::new(), LEVEL, base).ok()?;
    encoder.write_all(src).ok()?;
    let delta = encoder.finish().ok()?;
    if delta.is_empty() || delta.len() >= src.len() {
        return None;
    }
    Some(delta)
}

/// Reconstruct a share from its base and delta. Succeeds iff the decoded
/// output is exactly `declared_src_size` bytes.
pub fn decode(base: &[u8], delta: &[u8], declared_src_size: usize) -> Option<Vec<u8>> {
    let mut decoder = Decoder::with_dictionary(Cursor::new(delta), base).ok()?;
    let mut src = Vec::with_capacity(declared_src_size);
    decoder.read_to_end(&mut src).ok()?;
    if src.len() != declared_src_size {
        return None;
    }
    Some(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn patterned(len: usize, modulus: u8) -> Vec<u8> {
        (0..len).map(|i| (i % modulus as usize) as u8).collect()
    }

    #[test]
    fn round_trip_on_similar_payloads() {
        let base = patterned(8192, 251);
        let mut src = base.clone();
        src[100] ^= 0xff;
        src[5000] ^= 0x0f;

        let delta = encode(&base, &src).expect("similar payloads should encode");
        assert!(delta.len() < src.len());
        assert_eq!(decode(&base, &delta, src.len()).unwrap(), src);
    }

    #[test]
    fn refuses_small_base() {
        let base = patterned(MIN_BASE_SIZE - 1, 251);
        let src = patterned(4096, 251);
        assert!(encode(&base, &src).is_none());
    }

    #[test]
    fn refuses_small_src() {
        let base = patterned(8192, 251);
        let src = patterned(MIN_SRC_SIZE - 1, 251);
        assert!(encode(&base, &src).is_none());
    }

    #[test]
    fn refuses_when_no_gain() {
        // incompressible pseudo-random share unrelated to the base
        let base = patterned(4096, 251);
        let mut state = 0x12345678u32;
        let src: Vec<u8> = (0..1024)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        if let Some(delta) = encode(&base, &src) {
            // if the encoder does find gain, the contract still holds
            assert!(delta.len() < src.len());
            assert_eq!(decode(&base, &delta, src.len()).unwrap(), src);
        }
    }

    #[test]
    fn decode_rejects_wrong_declared_size() {
        let base = patterned(8192, 251);
        let mut src = base.clone();
        src[0] ^= 1;
        let delta = encode(&base, &src).unwrap();
        assert!(decode(&base, &delta, src.len() + 1).is_none());
        assert!(decode(&base, &delta, src.len() - 1).is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        let base = patterned(8192, 251);
        assert!(decode(&base, b"not a delta", 100).is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn prop_round_trip(
            base in prop::collection::vec(0u8..=255, MIN_BASE_SIZE..4096),
            edits in prop::collection::vec((0usize..4096, 0u8..=255), 0..32),
        ) {
            // derive src from base by a handful of point edits
            let mut src = base.clone();
            for (pos, value) in edits {
                let len = src.len();
                src[pos % len] = value;
            }
            if let Some(delta) = encode(&base, &src) {
                prop_assert!(delta.len() < src.len());
                prop_assert_eq!(decode(&base, &delta, src.len()).unwrap(), src);
            }
        }
    }
}
