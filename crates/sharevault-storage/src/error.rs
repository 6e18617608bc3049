//! Error types for the storage backend.

/// All errors that can occur in the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O failure on a container, recipe file or directory.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    /// Key-value store failure other than not-found.
    #[error("key-value store error: {0}")]
    Db(#[from] redb::Error),
    /// A freshly dispensed container name already exists on disk.
    #[error("container file {name} already exists")]
    ContainerExists {
        /// Name of the colliding container.
        name: String,
    },
    /// A container referenced by an index entry is missing.
    #[error("container file {name} does not exist")]
    ContainerMissing {
        /// Name of the missing container.
        name: String,
    },
    /// A read or write would run past the end of a container.
    #[error("container {name} access out of bounds: offset {offset} + {len} > {size}")]
    OutOfBounds {
        /// Container name.
        name: String,
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Container size.
        size: usize,
    },
    /// A payload larger than a whole container can never be stored.
    #[error("payload of {len} bytes exceeds container size {container_size}")]
    OversizedPayload {
        /// Payload length.
        len: usize,
        /// Fixed container size.
        container_size: usize,
    },
    /// The lexicographic name space is used up. Fatal to the process.
    #[error("container name dispenser exhausted")]
    NamesExhausted,
    /// No recipe exists for the requested key.
    #[error("no recipe for key {key_hex}")]
    RecipeNotFound {
        /// Hex of the recipe key.
        key_hex: String,
    },
    /// A recipe fragment arrived for a file with no unfinished buffer.
    #[error("no unfinished recipe buffer for key {key_hex}")]
    UnfinishedRecipeMissing {
        /// Hex of the recipe key.
        key_hex: String,
    },
    /// The unfinished buffer's head disagrees with the incoming fragment.
    #[error("recipe head mismatch for key {key_hex}: {detail}")]
    RecipeHeadMismatch {
        /// Hex of the recipe key.
        key_hex: String,
        /// Which field disagreed.
        detail: String,
    },
    /// A lock was poisoned by a panicking holder.
    #[error("poisoned lock: {what}")]
    Poisoned {
        /// The structure whose lock was poisoned.
        what: &'static str,
    },
    /// A stored record failed to parse.
    #[error(transparent)]
    Layout(#[from] sharevault_proto::ProtoError),
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Db(e.into())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Db(e.into())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Db(e.into())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Db(e.into())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Db(e.into())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
