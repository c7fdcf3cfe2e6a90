//! Remote content source trait and implementations.
//!
//! This module defines the [`ContentSource`] trait: the read-only view this
//! crate has of the remote hosting store. Implementations transparently pick
//! a transport strategy; callers see the same shape regardless.

mod http;
#[cfg(feature = "mock")]
mod mock;

pub use self::http::HttpSource;
#[cfg(feature = "mock")]
pub use self::mock::MockSource;
use crate::error::Result;
use crate::models::{AssetDownload, AssetRef, ContentRef, RemoteContent};
use async_trait::async_trait;

/// Unified interface for remote content.
///
/// No method retries or imposes a timeout of its own; retry policy and
/// deadlines belong to the caller (or to the transport the implementation was
/// built with).
///
/// # Examples
///
/// ```
/// use shelf_remote::{ContentRef, ContentSource, error::Result};
///
/// async fn catalog_size(source: &dyn ContentSource) -> Result<usize> {
///     let catalog = ContentRef::new("me", "books", "catalog.json");
///     let content = source.fetch(&catalog).await?;
///     // Keep `content.token` around to update the catalog later.
///     Ok(content.bytes.len())
/// }
/// ```
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Name of the configured source (used for logging only).
    fn name(&self) -> &str;

    /// Fetch the complete content of a file by path, together with its
    /// content token.
    ///
    /// Small files arrive inline with the metadata; files over
    /// [`INLINE_LIMIT`](crate::INLINE_LIMIT) need a second request to the
    /// raw-bytes endpoint. Failures name the [`Stage`](crate::error::Stage)
    /// that failed.
    async fn fetch(&self, content: &ContentRef) -> Result<RemoteContent>;

    /// Open a streaming download of a release asset.
    ///
    /// Returns [`AssetNotFound`](crate::error::ErrorKind::AssetNotFound) if
    /// the release exists but has no asset by that name.
    async fn open_asset(&self, asset: &AssetRef) -> Result<AssetDownload>;
}
