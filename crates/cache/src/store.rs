//! Local filesystem cache store.
//!
//! All state-mutating writes follow the same protocol: stream into a uniquely
//! named `.tmp` sibling, close it, verify it, then rename it onto the final
//! path. Readers
//! either see the old complete file or the new complete file, and every error
//! path removes its own temporary file before returning.
//!
//! The cache root is owned by a single process. No file locking is used
//! beyond the atomic rename; two writers storing the same key race at the
//! rename and whichever lands last wins.

use crate::covers::{CoverSource, Thumbnailer};
use crate::error::{ErrorKind, Result};
use crate::integrity;
use crate::manifest::{Manifest, SyncRecord};
use crate::path::{CacheKey, Layout, ensure_dir, temp_file};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::instrument;

/// A successfully stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Final location of the file.
    pub path: PathBuf,
    /// Hash of the stored content.
    pub hash: String,
    /// Number of bytes written.
    pub size: u64,
}

/// Atomic write/remove/exists operations over the local cache tree.
///
/// # Examples
///
/// ```no_run
/// use shelf_cache::{CacheKey, CacheStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = CacheStore::new("/home/me/.cache/shelf/library")?;
/// let key = CacheKey::new("me", "books", "17", "dune.epub");
/// let entry = store.store(&key, &b"...epub bytes..."[..], None).await?;
/// assert!(store.exists(&key).await);
/// assert!(!store.has_been_modified(&key, Some(&entry.hash)).await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CacheStore {
    layout: Layout,
    thumbnailer: Option<Arc<Thumbnailer>>,
    // Serialises manifest read-modify-write cycles within this process.
    manifest_lock: Arc<Mutex<()>>,
}
impl CacheStore {
    /// Open (creating if necessary) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRoot`](ErrorKind::InvalidRoot) if the path is not
    /// absolute or exists but is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidRoot(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidRoot(root));
            }
        } else {
            // Once per process; not worth making the constructor async.
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
            builder.create(&root).or_raise(|| ErrorKind::DirectoryCreateFailed(root.clone()))?;
        }
        Ok(Self {
            layout: Layout::new(root),
            thumbnailer: None,
            manifest_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Extract cover thumbnails after each successful store.
    pub fn with_thumbnailer(mut self, thumbnailer: Thumbnailer) -> Self {
        self.thumbnailer = Some(Arc::new(thumbnailer));
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Store the content read from `reader` as the asset identified by `key`.
    ///
    /// When `expected_hash` is given, the content must hash to it or the call
    /// fails with [`ChecksumMismatch`](ErrorKind::ChecksumMismatch) and leaves
    /// any previously cached content untouched. Last write wins; there is no
    /// versioning.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn store<R>(&self, key: &CacheKey, reader: R, expected_hash: Option<&str>) -> Result<StoredEntry>
    where
        R: AsyncRead + Unpin + Send,
    {
        key.validate()?;
        let path = self.layout.asset_path(key);
        let entry = write_atomic(&path, reader, expected_hash).await?;
        tracing::debug!(path = %entry.path.display(), bytes = entry.size, "Stored cache entry");
        if let Some(thumbnailer) = &self.thumbnailer {
            thumbnailer.attempt(entry.path.clone(), self.layout.extracted_cover_path(key));
        }
        Ok(entry)
    }

    /// Whether a complete file is cached for `key`. Invalid keys are never
    /// cached.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        if key.validate().is_err() {
            return false;
        }
        fs::try_exists(self.layout.asset_path(key)).await.unwrap_or(false)
    }

    /// Delete the cached file for `key`. Deleting something that isn't there
    /// is not an error.
    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        key.validate()?;
        remove_if_exists(&self.layout.asset_path(key)).await
    }

    /// `true` only when a cached file exists and its content no longer hashes
    /// to `expected_hash` (the hash recorded at the last sync).
    pub async fn has_been_modified(&self, key: &CacheKey, expected_hash: Option<&str>) -> bool {
        if key.validate().is_err() {
            return false;
        }
        integrity::has_diverged(&self.layout.asset_path(key), expected_hash).await
    }

    /// Current hash of the cached file, if there is one.
    pub async fn hash(&self, key: &CacheKey) -> Result<Option<String>> {
        if !self.exists(key).await {
            return Ok(None);
        }
        integrity::hash_file(&self.layout.asset_path(key)).await.map(Some)
    }

    // =========================================================================
    // Sync manifest
    // =========================================================================

    /// Remember `hash` (and the remote content token) as the state of `key` at
    /// its last successful sync. Replaces any earlier record.
    pub async fn record(&self, key: &CacheKey, hash: &str, content_token: Option<String>) -> Result<SyncRecord> {
        key.validate()?;
        let path = self.layout.manifest_path(key);
        let record = SyncRecord::new(hash, content_token);
        let _guard = self.manifest_lock.lock().await;
        ensure_dir(&self.layout.repository_dir(key)).await?;
        let mut manifest = Manifest::load(&path).await?;
        manifest.assets.insert(key.asset.clone(), record.clone());
        manifest.save(&path).await?;
        Ok(record)
    }

    /// The record written by the last successful sync of `key`.
    pub async fn recorded(&self, key: &CacheKey) -> Result<Option<SyncRecord>> {
        key.validate()?;
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = Manifest::load(&self.layout.manifest_path(key)).await?;
        Ok(manifest.assets.remove(&key.asset))
    }

    /// Drop the sync record of `key`. Idempotent.
    pub async fn forget(&self, key: &CacheKey) -> Result<()> {
        key.validate()?;
        let path = self.layout.manifest_path(key);
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = Manifest::load(&path).await?;
        if manifest.assets.remove(&key.asset).is_some() {
            manifest.save(&path).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Covers
    // =========================================================================

    /// The cover to display for `key`: the catalog cover when there is one,
    /// otherwise the extracted thumbnail.
    pub async fn cover(&self, key: &CacheKey) -> Option<(CoverSource, PathBuf)> {
        key.validate().ok()?;
        let catalog = self.layout.catalog_cover_path(key);
        if fs::try_exists(&catalog).await.unwrap_or(false) {
            return Some((CoverSource::Catalog, catalog));
        }
        let extracted = self.layout.extracted_cover_path(key);
        if fs::try_exists(&extracted).await.unwrap_or(false) {
            return Some((CoverSource::Extracted, extracted));
        }
        None
    }

    /// Store an externally supplied cover for `key`.
    pub async fn store_cover<R>(&self, key: &CacheKey, reader: R) -> Result<StoredEntry>
    where
        R: AsyncRead + Unpin + Send,
    {
        key.validate()?;
        write_atomic(&self.layout.catalog_cover_path(key), reader, None).await
    }

    /// Delete the thumbnail extracted from the asset of `key`; the catalog
    /// cover belongs to the item rather than the asset and is kept.
    pub async fn remove_extracted_cover(&self, key: &CacheKey) -> Result<()> {
        key.validate()?;
        remove_if_exists(&self.layout.extracted_cover_path(key)).await
    }
}

/// Temp-file-then-rename write of `reader` onto `path`.
///
/// Every call writes its own temporary file, so concurrent writes of one path
/// each publish a complete file and the last rename wins. The temporary file
/// is deleted when it is dropped on any error path.
async fn write_atomic<R>(path: &Path, mut reader: R, expected_hash: Option<&str>) -> Result<StoredEntry>
where
    R: AsyncRead + Unpin + Send,
{
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    let (file, tmp) = temp_file(path).or_raise(|| ErrorKind::TempWriteFailed(path.to_path_buf()))?.into_parts();
    let size = write_temp(fs::File::from_std(file), &mut reader)
        .await
        .or_raise(|| ErrorKind::TempWriteFailed(tmp.to_path_buf()))?;

    let hash = match integrity::verify(&tmp, expected_hash).await? {
        Some(hash) => hash,
        None => integrity::hash_file(&tmp).await?,
    };

    tmp.persist(path)
        .map_err(|e| e.error)
        .or_raise(|| ErrorKind::RenameFailed(path.to_path_buf()))?;
    Ok(StoredEntry { path: path.to_path_buf(), hash, size })
}

async fn write_temp<R>(mut file: fs::File, reader: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let size = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    // Closed on drop; everything has already been flushed and synced.
    drop(file);
    Ok(size)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).or_raise(|| ErrorKind::RemoveFailed(path.to_path_buf())),
    }
}
