//! Error types for the dedup engine.

/// All errors that can occur in the dedup pipeline and restore paths.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// A malformed record or packet. Fatal to the session.
    #[error(transparent)]
    Proto(#[from] sharevault_proto::ProtoError),
    /// A storage backend failure.
    #[error(transparent)]
    Storage(#[from] sharevault_storage::StorageError),
    /// A full file name the engine refuses to accept.
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFileName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A share index entry that restore expected to exist is missing.
    #[error("no share index for fingerprint {fp_hex}")]
    ShareIndexMissing {
        /// Hex of the missing fingerprint.
        fp_hex: String,
    },
    /// The base of a delta chain is missing from the index.
    #[error("delta base index missing for fingerprint {fp_hex}")]
    BaseIndexMissing {
        /// Hex of the missing base fingerprint.
        fp_hex: String,
    },
    /// A restored payload's size disagrees with the index head.
    #[error("restored share size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Size the index head declares.
        expected: usize,
        /// Size actually produced.
        actual: usize,
    },
    /// A stored delta failed to decode against its base.
    #[error("delta payload at {container}:{offset} failed to decode")]
    DeltaCorrupt {
        /// Container holding the delta.
        container: String,
        /// Offset of the delta within the container.
        offset: u64,
    },
    /// A peer-routed operation reached a node with no peer transport.
    #[error("peer routing unavailable: {op} for fingerprint {fp_hex}")]
    PeerUnavailable {
        /// The operation that needed a peer.
        op: &'static str,
        /// Hex of the fingerprint being routed.
        fp_hex: String,
    },
}

/// Result alias for dedup operations.
pub type DedupResult<T> = Result<T, DedupError>;
