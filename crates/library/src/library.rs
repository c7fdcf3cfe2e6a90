use crate::error::{ErrorKind, Result};
use crate::item::{CatalogCover, Item, SyncState};
use crate::progress::{Progress, Reporter};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use shelf_asyncutils::ProgressReader;
use shelf_cache::{CacheKey, CacheStore, DEFAULT_THUMBNAIL_CONCURRENCY, StoredEntry};
use shelf_remote::SourceHandle;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::instrument;

/// Outcome of [`Library::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// The asset was fetched and stored at this path.
    Downloaded(PathBuf),
    /// The asset was already cached at this path; nothing was fetched.
    AlreadyCached(PathBuf),
}

impl Fetched {
    /// Whether anything was actually transferred.
    pub fn downloaded(&self) -> bool {
        matches!(self, Self::Downloaded(_))
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Downloaded(path) | Self::AlreadyCached(path) => path,
        }
    }
}

/// Everything the interactive layer needs from the core: download, uncache,
/// and cache state queries over one cache root and one remote source.
///
/// Cloning is cheap; clones share the same cache and source.
#[derive(Clone)]
pub struct Library {
    cache: CacheStore,
    source: SourceHandle,
    cover_permits: Arc<Semaphore>,
}

impl Library {
    pub fn new(cache: CacheStore, source: SourceHandle) -> Self {
        Self::with_cover_concurrency(cache, source, DEFAULT_THUMBNAIL_CONCURRENCY)
    }

    /// Bound the number of catalog covers fetched at once.
    pub fn with_cover_concurrency(cache: CacheStore, source: SourceHandle, concurrency: usize) -> Self {
        Self { cache, source, cover_permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    /// Download `item` unless it is already cached.
    ///
    /// A cached copy is returned as-is even when it has been modified locally;
    /// replacing local changes is never implicit.
    pub async fn download(&self, item: &Item) -> Result<Fetched> {
        self.download_reporting(item, Reporter::Silent).await
    }

    /// [`download`](Self::download) with progress updates sent to `progress`.
    /// Updates are dropped when the channel is full or closed.
    pub async fn download_with_progress(&self, item: &Item, progress: mpsc::Sender<Progress>) -> Result<Fetched> {
        self.download_reporting(item, Reporter::Channel(progress)).await
    }

    async fn download_reporting(&self, item: &Item, reporter: Reporter) -> Result<Fetched> {
        if self.cache.exists(&item.key).await {
            tracing::debug!(key = %item.key, "Already cached, skipping download");
            return Ok(Fetched::AlreadyCached(self.cache.layout().asset_path(&item.key)));
        }
        let entry = self.transfer_reporting(item, reporter).await?;
        Ok(Fetched::Downloaded(entry.path))
    }

    /// Fetch `item` from the remote and store it, replacing whatever is cached.
    /// On success the sync manifest records the fresh hash, so the item reads
    /// as clean afterwards.
    pub async fn transfer(&self, item: &Item) -> Result<StoredEntry> {
        self.transfer_reporting(item, Reporter::Silent).await
    }

    #[instrument(skip_all, fields(key = %item.key, release = %item.release))]
    pub(crate) async fn transfer_reporting(&self, item: &Item, reporter: Reporter) -> Result<StoredEntry> {
        let download = self.source.open_asset(&item.asset_ref()).await.map_err(ErrorKind::remote)?;
        let total = if download.size > 0 { download.size } else { item.size };
        reporter.report(Progress::new(0, total));
        let reader = ProgressReader::new(download.reader, |transferred| {
            reporter.report(Progress::new(transferred, total));
        });
        let entry = self
            .cache
            .store(&item.key, reader, item.expected_hash.as_deref())
            .await
            .map_err(ErrorKind::cache)?;
        self.cache.record(&item.key, &entry.hash, download.token).await.map_err(ErrorKind::cache)?;
        tracing::info!(key = %item.key, bytes = entry.size, "Downloaded");
        Ok(entry)
    }

    /// Remove the cached asset of `key`, its extracted thumbnail and its sync
    /// record. Removing an item that isn't cached is not an error.
    pub async fn uncache(&self, key: &CacheKey) -> Result<()> {
        self.cache.remove(key).await.map_err(ErrorKind::cache)?;
        self.cache.remove_extracted_cover(key).await.map_err(ErrorKind::cache)?;
        self.cache.forget(key).await.map_err(ErrorKind::cache)?;
        tracing::info!(key = %key, "Uncached");
        Ok(())
    }

    /// Whether the cached copy of `item` has changed since it was fetched.
    ///
    /// Compares against the catalog hash when the item carries one, otherwise
    /// against the hash recorded in the sync manifest. Never cached means not
    /// modified.
    pub async fn has_been_modified(&self, item: &Item) -> bool {
        let recorded = match item.expected_hash.as_ref().filter(|hash| !hash.is_empty()) {
            Some(hash) => Some(hash.clone()),
            None => match self.cache.recorded(&item.key).await {
                Ok(record) => record.map(|r| r.hash),
                Err(e) => {
                    tracing::warn!(key = %item.key, error = ?e, "Could not read sync record");
                    None
                },
            },
        };
        self.cache.has_been_modified(&item.key, recorded.as_deref()).await
    }

    pub async fn state(&self, item: &Item) -> SyncState {
        if !self.cache.exists(&item.key).await {
            SyncState::Absent
        } else if self.has_been_modified(item).await {
            SyncState::Modified
        } else {
            SyncState::Clean
        }
    }

    /// Fetch catalog covers concurrently, at most `cover_concurrency` at a
    /// time, yielding each outcome as it completes.
    pub fn fetch_catalog_covers(
        &self,
        covers: Vec<CatalogCover>,
    ) -> impl Stream<Item = (CacheKey, Result<PathBuf>)> + '_ {
        stream! {
            let mut pending: FuturesUnordered<_> = covers.into_iter().map(|cover| self.fetch_catalog_cover(cover)).collect();
            while let Some(outcome) = pending.next().await {
                yield outcome;
            }
        }
    }

    async fn fetch_catalog_cover(&self, cover: CatalogCover) -> (CacheKey, Result<PathBuf>) {
        let result = self.store_catalog_cover(&cover).await;
        (cover.key, result)
    }

    async fn store_catalog_cover(&self, cover: &CatalogCover) -> Result<PathBuf> {
        let _permit = self.cover_permits.acquire().await.or_raise(|| ErrorKind::Aborted)?;
        let content = self.source.fetch(&cover.content).await.map_err(ErrorKind::remote)?;
        let entry = self.cache.store_cover(&cover.key, Cursor::new(content.bytes)).await.map_err(ErrorKind::cache)?;
        tracing::debug!(key = %cover.key, path = %entry.path.display(), "Catalog cover stored");
        Ok(entry.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_cache::integrity::hash_bytes;
    use shelf_remote::{ContentRef, MockSource};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup(source: MockSource) -> (TempDir, Library, Arc<MockSource>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(temp_dir.path()).unwrap();
        let source = Arc::new(source);
        let library = Library::new(cache, source.clone());
        (temp_dir, library, source)
    }

    fn item(asset: &str) -> Item {
        Item::new(CacheKey::new("me", "books", asset.trim_end_matches(".pdf"), asset), "v1")
    }

    #[tokio::test]
    async fn test_download_then_already_cached() {
        let (_temp_dir, library, source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let item = item("a.pdf").with_expected_hash(hash_bytes(b"%PDF-a"));

        let first = library.download(&item).await.unwrap();
        assert!(first.downloaded());
        assert_eq!(std::fs::read(first.path()).unwrap(), b"%PDF-a");

        let second = library.download(&item).await.unwrap();
        assert_eq!(second, Fetched::AlreadyCached(first.path().clone()));
        assert_eq!(source.opened(), 1);
        assert_eq!(library.state(&item).await, SyncState::Clean);
    }

    #[tokio::test]
    async fn test_download_records_sync_state() {
        let (_temp_dir, library, _source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let item = item("a.pdf");

        library.download(&item).await.unwrap();
        let record = library.cache().recorded(&item.key).await.unwrap().unwrap();
        assert_eq!(record.hash, hash_bytes(b"%PDF-a"));
        assert_eq!(record.content_token, Some(hash_bytes(b"%PDF-a")));
    }

    #[tokio::test]
    async fn test_download_with_progress_reports_completion() {
        let content = vec![1u8; 200_000];
        let (_temp_dir, library, _source) = setup(MockSource::default().with_asset("v1", "big.pdf", content.clone()));
        let (tx, mut rx) = mpsc::channel(1024);

        library.download_with_progress(&item("big.pdf"), tx).await.unwrap();
        let mut updates = Vec::new();
        while let Ok(progress) = rx.try_recv() {
            updates.push(progress);
        }
        assert_eq!(updates.first(), Some(&Progress::new(0, 200_000)));
        assert_eq!(updates.last(), Some(&Progress::new(200_000, 200_000)));
        assert!(updates.windows(2).all(|w| w[0].transferred <= w[1].transferred));
    }

    #[tokio::test]
    async fn test_download_with_abandoned_progress_channel() {
        let (_temp_dir, library, _source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(library.download_with_progress(&item("a.pdf"), tx).await.unwrap().downloaded());
    }

    #[tokio::test]
    async fn test_modified_copy_is_kept_until_transferred() {
        let (_temp_dir, library, source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let item = item("a.pdf");
        let path = library.download(&item).await.unwrap().path().clone();

        std::fs::write(&path, b"%PDF-a with annotations").unwrap();
        assert!(library.has_been_modified(&item).await);
        assert_eq!(library.state(&item).await, SyncState::Modified);

        // Never clobbered implicitly.
        assert!(!library.download(&item).await.unwrap().downloaded());
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-a with annotations");

        library.transfer(&item).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-a");
        assert_eq!(library.state(&item).await, SyncState::Clean);
        assert_eq!(source.opened(), 2);
    }

    #[tokio::test]
    async fn test_empty_catalog_hash_falls_back_to_sync_record() {
        let (_temp_dir, library, _source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let item = item("a.pdf").with_expected_hash("");
        let path = library.download(&item).await.unwrap().path().clone();
        assert_eq!(library.state(&item).await, SyncState::Clean);

        std::fs::write(&path, b"%PDF-a with annotations").unwrap();
        assert!(library.has_been_modified(&item).await);
        assert_eq!(library.state(&item).await, SyncState::Modified);
    }

    #[tokio::test]
    async fn test_uncache_is_idempotent() {
        let (_temp_dir, library, _source) = setup(MockSource::default().with_asset("v1", "a.pdf", b"%PDF-a"));
        let item = item("a.pdf");
        library.download(&item).await.unwrap();

        library.uncache(&item.key).await.unwrap();
        assert_eq!(library.state(&item).await, SyncState::Absent);
        assert!(library.cache().recorded(&item.key).await.unwrap().is_none());
        library.uncache(&item.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_asset_is_remote_error() {
        let (_temp_dir, library, _source) = setup(MockSource::default());
        let err = library.download(&item("a.pdf")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Remote(_)));
        assert!(!library.cache().exists(&item("a.pdf").key).await);
    }

    #[tokio::test]
    async fn test_fetch_catalog_covers() {
        let source = MockSource::default().with_content("covers/a.jpg", b"jpeg-a").with_content("covers/b.jpg", b"jpeg-b");
        let (_temp_dir, library, _source) = setup(source);
        let covers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| CatalogCover {
                key: CacheKey::new("me", "books", id, format!("{id}.pdf")),
                content: ContentRef::new("me", "books", format!("covers/{id}.jpg")),
            })
            .collect();

        let outcomes: HashMap<String, Result<PathBuf>> =
            library.fetch_catalog_covers(covers).map(|(key, result)| (key.item_id, result)).collect().await;
        assert_eq!(outcomes.len(), 3);
        let a = outcomes["a"].as_ref().unwrap();
        assert_eq!(std::fs::read(a).unwrap(), b"jpeg-a");
        assert!(outcomes["b"].is_ok());
        assert!(matches!(&**outcomes["c"].as_ref().unwrap_err(), ErrorKind::Remote(_)));

        let key = CacheKey::new("me", "books", "a", "a.pdf");
        let (source, path) = library.cache().cover(&key).await.unwrap();
        assert_eq!(source, shelf_cache::CoverSource::Catalog);
        assert_eq!(&path, a);
    }
}
