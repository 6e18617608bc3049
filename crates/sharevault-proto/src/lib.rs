#![warn(missing_docs)]

//! Wire protocol and record layouts for the sharevault dedup server.
//!
//! Everything on the wire and in the index is little-endian and packed: the
//! packet header, the file-share metadata a client uploads, the share index
//! values kept in the key-value store, the file recipes, and the restored
//! share file streamed back on download. This crate owns those layouts and
//! the small value types (fingerprints, container names, index keys) the
//! rest of the system passes around.

pub mod error;
pub mod indicator;
pub mod layout;
pub mod types;
pub mod wire;

pub use error::ProtoError;
pub use indicator::{Indicator, INDICATOR_SIZE, PACKET_HEADER_SIZE, PACKET_SIZE_SIZE};
pub use layout::{
    FileRecipeEntry, FileRecipeHead, FileShareMetaHead, ShareEntry, ShareFileHead,
    ShareIndexHead, ShareIndexValue, ShareMeta, ShareMetaEntry, FILE_RECIPE_ENTRY_SIZE,
    FILE_RECIPE_HEAD_SIZE, FILE_SHARE_META_HEAD_SIZE, SHARE_ENTRY_SIZE, SHARE_FILE_HEAD_SIZE,
    SHARE_INDEX_HEAD_SIZE, SHARE_META_ENTRY_SIZE, SHARE_USER_REF_SIZE,
};
pub use types::{
    ContainerName, Fingerprint, IndexKey, KeyPrefix, UserId, CONTAINER_NAME_SIZE, FP_SIZE,
    KEY_SIZE, USER_ID_SIZE,
};
pub use wire::PacketHeader;
