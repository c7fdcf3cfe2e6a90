//! Local on-disk cache of library assets.
//!
//! The canonical copies of the library live in a remote hosting store; this
//! crate owns the local working copies. It decides where a file lives on disk
//! ([`Layout`]), whether it is byte-identical to what was fetched
//! ([`integrity`]), and writes it there without ever exposing a partial file
//! ([`CacheStore`]).
//!
//! # Architecture
//! - **Path Resolver** ([`Layout`]): pure mapping from a [`CacheKey`] to a
//!   path below the cache root.
//! - **Integrity Verifier** ([`integrity`]): BLAKE3 content hashing,
//!   verification, and divergence detection.
//! - **Cache Store** ([`CacheStore`]): atomic store/remove/exists, plus the
//!   per-repository sync manifest and cover lookup.
//!
//! There is no garbage collection: an item deleted upstream leaves its cached
//! file behind until it is explicitly removed.

pub mod covers;
pub mod error;
pub mod integrity;
mod manifest;
mod path;
mod store;

pub use crate::covers::{CoverSource, DEFAULT_THUMBNAIL_CONCURRENCY, Thumbnailer};
pub use crate::manifest::SyncRecord;
pub use crate::path::{CacheKey, Layout, ensure_dir};
pub use crate::store::{CacheStore, StoredEntry};
