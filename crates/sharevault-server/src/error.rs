//! Server error type.

use std::path::PathBuf;

/// Errors raised by the session layer and server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed packet or record; fatal to the session.
    #[error(transparent)]
    Proto(#[from] sharevault_proto::ProtoError),
    /// Storage backend failure.
    #[error(transparent)]
    Storage(#[from] sharevault_storage::StorageError),
    /// Dedup engine failure.
    #[error(transparent)]
    Dedup(#[from] sharevault_dedup::DedupError),
    /// The config file could not be read or parsed.
    #[error("config error in {path}: {message}")]
    Config {
        /// Path of the offending config file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
    /// The 1-based node index does not point into the cluster list.
    #[error("node index {index} is out of range for a cluster of {nodes}")]
    BadNodeIndex {
        /// Index given on the command line.
        index: usize,
        /// Number of configured cluster nodes.
        nodes: usize,
    },
    /// A cluster entry does not form a usable socket address.
    #[error("bad cluster address {ip}:{port}")]
    BadAddress {
        /// Configured ip.
        ip: String,
        /// Configured port.
        port: String,
    },
}
