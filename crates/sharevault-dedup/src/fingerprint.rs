//! Content fingerprinting and file name normalization.

use sha2::{Digest, Sha256};

use sharevault_proto::{Fingerprint, UserId};

use crate::error::{DedupError, DedupResult};

/// SHA-256 fingerprint over a share's payload bytes.
pub fn share_fingerprint(data: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(data);
    Fingerprint(digest.into())
}

/// Fingerprint identifying a file's recipe: SHA-256 over the formatted
/// full file name followed by the little-endian user id. Two users
/// uploading the same path get distinct recipes.
pub fn recipe_fingerprint(full_file_name: &str, user_id: UserId) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(full_file_name.as_bytes());
    hasher.update(user_id.to_le_bytes());
    Fingerprint(hasher.finalize().into())
}

/// Normalize a full file name to `/…/shortName`: an empty name and names
/// beginning with "./" or "../" are refused, and a missing leading '/' is
/// prepended.
pub fn format_full_file_name(full_file_name: &str) -> DedupResult<String> {
    if full_file_name.is_empty() {
        return Err(DedupError::InvalidFileName {
            name: full_file_name.to_string(),
            reason: "empty",
        });
    }
    if full_file_name.starts_with('/') {
        return Ok(full_file_name.to_string());
    }
    if full_file_name.starts_with("./") || full_file_name.starts_with("../") {
        return Err(DedupError::InvalidFileName {
            name: full_file_name.to_string(),
            reason: "relative prefix",
        });
    }
    Ok(format!("/{full_file_name}"))
}
