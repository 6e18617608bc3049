//! Small value types shared across the engine.

use std::fmt;

use crate::error::ProtoError;

/// Size of a content fingerprint (SHA-256).
pub const FP_SIZE: usize = 32;
/// Size of a container file name.
pub const CONTAINER_NAME_SIZE: usize = 16;
/// Size of an index key: one prefix byte plus a fingerprint.
pub const KEY_SIZE: usize = 1 + FP_SIZE;
/// Size of a user id on the wire.
pub const USER_ID_SIZE: usize = 4;

/// Identifies the client that owns an upload. Carried verbatim in index
/// entries and recipe heads.
pub type UserId = i32;

/// SHA-256 content hash over a share's payload bytes. Equal fingerprints
/// are treated as identical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; FP_SIZE]);

impl Fingerprint {
    /// The all-zero fingerprint, used as the base of non-delta shares.
    pub const ZERO: Fingerprint = Fingerprint([0u8; FP_SIZE]);

    /// Raw bytes of the fingerprint.
    pub fn as_bytes(&self) -> &[u8; FP_SIZE] {
        &self.0
    }

    /// True for the all-zero fingerprint.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; FP_SIZE]
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a fingerprint out of a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtoError> {
        let arr: [u8; FP_SIZE] = bytes.try_into().map_err(|_| ProtoError::Truncated {
            what: "fingerprint",
            need: FP_SIZE,
            have: bytes.len(),
        })?;
        Ok(Fingerprint(arr))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Name of a container file: 16 ASCII lowercase letters allocated in
/// lexicographic order by the name dispenser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerName(pub [u8; CONTAINER_NAME_SIZE]);

impl ContainerName {
    /// Raw bytes of the name.
    pub fn as_bytes(&self) -> &[u8; CONTAINER_NAME_SIZE] {
        &self.0
    }

    /// The name as a string slice. Dispensed names are always ASCII; a
    /// non-ASCII name can only come from a corrupted index entry.
    pub fn as_str(&self) -> Result<&str, ProtoError> {
        std::str::from_utf8(&self.0).map_err(|_| ProtoError::BadFileNameEncoding)
    }

    /// Parse a container name out of a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtoError> {
        let arr: [u8; CONTAINER_NAME_SIZE] =
            bytes.try_into().map_err(|_| ProtoError::Truncated {
                what: "container name",
                need: CONTAINER_NAME_SIZE,
                have: bytes.len(),
            })?;
        Ok(ContainerName(arr))
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

/// Prefix byte partitioning the key space of the single KV store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyPrefix {
    /// Key of a file recipe.
    Recipe = 0,
    /// Key of a share index value.
    ShareIndex = 1,
}

/// 33-byte key into the KV store: prefix byte followed by a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexKey(pub [u8; KEY_SIZE]);

impl IndexKey {
    /// Build a key from a prefix and a fingerprint.
    pub fn new(prefix: KeyPrefix, fp: &Fingerprint) -> Self {
        let mut key = [0u8; KEY_SIZE];
        key[0] = prefix as u8;
        key[1..].copy_from_slice(fp.as_bytes());
        IndexKey(key)
    }

    /// Raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// The fingerprint portion of the key.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fp = [0u8; FP_SIZE];
        fp.copy_from_slice(&self.0[1..]);
        Fingerprint(fp)
    }

    /// Lowercase hex rendering of the fingerprint portion. Recipe files on
    /// disk are named by this.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint().to_hex()
    }

    /// Lowercase hex rendering of the whole key, for log context.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_carries_prefix_and_fingerprint() {
        let fp = Fingerprint([0xab; FP_SIZE]);
        let key = IndexKey::new(KeyPrefix::ShareIndex, &fp);
        assert_eq!(key.as_bytes()[0], 1);
        assert_eq!(key.fingerprint(), fp);

        let recipe = IndexKey::new(KeyPrefix::Recipe, &fp);
        assert_eq!(recipe.as_bytes()[0], 0);
        assert_ne!(key, recipe);
    }

    #[test]
    fn zero_fingerprint() {
        assert!(Fingerprint::ZERO.is_zero());
        assert!(!Fingerprint([1; FP_SIZE]).is_zero());
    }

    #[test]
    fn hex_rendering() {
        let mut bytes = [0u8; FP_SIZE];
        bytes[0] = 0x0f;
        bytes[31] = 0xf0;
        let hex = Fingerprint(bytes).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("0f"));
        assert!(hex.ends_with("f0"));
    }

    #[test]
    fn container_name_display() {
        let name = ContainerName(*b"aaaaaaaaaaaaaaab");
        assert_eq!(name.to_string(), "aaaaaaaaaaaaaaab");
    }
}
