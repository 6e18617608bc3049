//! Storage backend for the sharevault dedup server.
//!
//! Three kinds of state live here, all behind the [`Backend`] facade:
//!
//! - the container pool: fixed-size memory-mapped files holding raw share
//!   and delta payloads, appended through a single writable container and
//!   read back through an LRU of sealed read-only mappings;
//! - the KV index: an ordered key-value store (redb) holding share index
//!   values and addressed by 33-byte prefixed fingerprint keys, with
//!   batched writes;
//! - the recipe store: per-file recipe buffers kept in memory until the
//!   file finishes uploading, then persisted as flat `.rf` files and served
//!   through a small LRU.

pub mod backend;
pub mod container;
pub mod dispenser;
pub mod error;
pub mod kv;
pub mod recipe;

pub use backend::{Backend, BackendConfig};
pub use container::{ReadContainer, WritableContainer};
pub use dispenser::NameDispenser;
pub use error::{StorageError, StorageResult};
pub use kv::KvIndex;
pub use recipe::RecipeStore;
