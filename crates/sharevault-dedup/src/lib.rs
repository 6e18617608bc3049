#![warn(missing_docs)]

//! Dedup engine for the sharevault server.
//!
//! Upload path: share → fingerprint probe (intra-user) → inter-user store
//! decision (duplicate reference / delta against a similar base / raw) →
//! container + index + recipe.
//! Download path: recipe → share-by-share restore, recursively through
//! delta base chains.

pub mod core;
pub mod delta;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod mediator;
pub mod similarity;

pub use crate::core::{DedupConfig, DedupCore, DedupStats};
pub use error::{DedupError, DedupResult};
pub use features::{super_features, SuperFeatures};
pub use fingerprint::{format_full_file_name, recipe_fingerprint, share_fingerprint};
pub use mediator::{PeerMediator, Route};
pub use similarity::SimilarityIndex;
