//! In-memory content source for testing.

use crate::ContentSource;
use crate::error::{ErrorKind, Result, Stage};
use crate::models::{AssetDownload, AssetRef, ContentRef, RemoteContent};
use async_trait::async_trait;
use exn::OptionExt;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory content source for testing.
///
/// Content is keyed by path (ignoring owner, repository and revision) and
/// assets by `(release, asset)`. Content tokens are the BLAKE3 hash of the
/// bytes, so they change whenever the content does.
///
/// # Examples
///
/// ```
/// use shelf_remote::{AssetRef, ContentRef, ContentSource, MockSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockSource::default()
///     .with_content("catalog.json", b"{}")
///     .with_asset("v1", "dune.epub", b"spice");
/// let catalog = source.fetch(&ContentRef::new("me", "books", "catalog.json")).await?;
/// assert_eq!(catalog.bytes, b"{}");
/// let download = source.open_asset(&AssetRef::new("me", "books", "v1", "dune.epub")).await?;
/// assert_eq!(download.size, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MockSource {
    name: String,
    contents: RwLock<HashMap<String, Vec<u8>>>,
    assets: RwLock<HashMap<(String, String), Vec<u8>>>,
    opened: AtomicUsize,
}

impl MockSource {
    /// Change the name of the mock source.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a file, addressed by path.
    pub fn with_content(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.contents.get_mut().insert(path.into(), bytes.into());
        self
    }

    /// Add an asset to a release.
    pub fn with_asset(
        mut self,
        release: impl Into<String>,
        asset: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.assets.get_mut().insert((release.into(), asset.into()), bytes.into());
        self
    }

    /// Replace or add an asset while the source is shared.
    pub async fn put_asset(&self, release: impl Into<String>, asset: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.assets.write().await.insert((release.into(), asset.into()), bytes.into());
    }

    /// How many asset downloads have been opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            contents: RwLock::new(HashMap::new()),
            assets: RwLock::new(HashMap::new()),
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, content: &ContentRef) -> Result<RemoteContent> {
        let bytes = self
            .contents
            .read()
            .await
            .get(&content.path)
            .cloned()
            .ok_or_raise(|| ErrorKind::FetchFailed { stage: Stage::Metadata, status: Some(404) })?;
        let token = blake3::hash(&bytes).to_hex().to_string();
        Ok(RemoteContent { bytes, token })
    }

    async fn open_asset(&self, asset: &AssetRef) -> Result<AssetDownload> {
        let bytes = self
            .assets
            .read()
            .await
            .get(&(asset.release.clone(), asset.asset.clone()))
            .cloned()
            .ok_or_raise(|| ErrorKind::AssetNotFound(asset.asset.clone()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let token = Some(blake3::hash(&bytes).to_hex().to_string());
        Ok(AssetDownload { size: bytes.len() as u64, token, reader: Box::pin(Cursor::new(bytes)) })
    }
}
