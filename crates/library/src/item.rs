use derive_more::Display;
use shelf_cache::CacheKey;
use shelf_remote::{AssetRef, ContentRef};

/// A library item as the reconciler sees it: where it is cached, where it is
/// downloaded from, and what it should hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: CacheKey,
    /// Tag of the release the asset is attached to.
    pub release: String,
    /// Size in bytes as listed in the catalog. Used for progress until the
    /// remote reports its own.
    pub size: u64,
    /// Hash recorded in the catalog. `None` defers to the sync manifest, or
    /// skips verification for a first download.
    pub expected_hash: Option<String>,
}

impl Item {
    pub fn new(key: CacheKey, release: impl Into<String>) -> Self {
        Self { key, release: release.into(), size: 0, expected_hash: None }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    pub fn asset_ref(&self) -> AssetRef {
        AssetRef::new(&self.key.owner, &self.key.repository, &self.release, &self.key.asset)
    }
}

/// Cache state of an item, derived on demand and never stored.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not cached.
    #[display("absent")]
    Absent,
    /// Cached and byte-identical to what was last fetched.
    #[display("clean")]
    Clean,
    /// Cached, but changed locally since it was last fetched. Whether to push
    /// it back upstream is the caller's decision.
    #[display("modified")]
    Modified,
}

/// A catalog-supplied cover image to fetch for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCover {
    pub key: CacheKey,
    pub content: ContentRef,
}
