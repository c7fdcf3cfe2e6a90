//! Cache layout and key validation.
//!
//! A [`Layout`] maps a [`CacheKey`] onto a deterministic path below the cache
//! root. Resolution is plain path concatenation and never fails; validation of
//! the key components happens separately (see [`CacheKey::validate`]) before
//! anything touches the filesystem.
//!
//! ```text
//! <root>/index.html
//! <root>/<repository>/<asset>
//! <root>/<repository>/.sync.json
//! <root>/<repository>/.covers/<item-id>.jpg
//! <root>/<repository>/.covers/<item-id>-catalog.jpg
//! ```
//!
//! > **Note:** the owner is part of the key but not of the path. A cache root
//! >           is assumed to hold the repositories of a single owner; two owners
//! >           with identically named repositories would share a directory.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::ffi::OsString;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tokio::fs::DirBuilder;

const COVERS_DIR: &str = ".covers";
const MANIFEST_FILE: &str = ".sync.json";
const INDEX_FILE: &str = "index.html";
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Identity of a cached asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub owner: String,
    pub repository: String,
    pub item_id: String,
    pub asset: String,
}
impl CacheKey {
    pub fn new(
        owner: impl Into<String>,
        repository: impl Into<String>,
        item_id: impl Into<String>,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            item_id: item_id.into(),
            asset: asset.into(),
        }
    }

    /// Check that every component that ends up in a path is a single, normal,
    /// non-reserved path component.
    ///
    /// # Examples
    ///
    /// ```
    /// use shelf_cache::CacheKey;
    ///
    /// assert!(CacheKey::new("me", "books", "42", "novel.epub").validate().is_ok());
    /// assert!(CacheKey::new("me", "..", "42", "novel.epub").validate().is_err());
    /// assert!(CacheKey::new("me", "books", "42", "../escape").validate().is_err());
    /// assert!(CacheKey::new("me", "books", "42", ".covers").validate().is_err());
    /// assert!(CacheKey::new("me", "books", "42", "partial.tmp").validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        validate_component(&self.repository)?;
        validate_component(&self.item_id)?;
        validate_component(&self.asset)?;
        if self.asset.ends_with(TEMP_SUFFIX) {
            exn::bail!(ErrorKind::InvalidKey(self.asset.clone()));
        }
        Ok(())
    }
}
impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}#{}:{}", self.owner, self.repository, self.item_id, self.asset)
    }
}

fn validate_component(value: &str) -> Result<()> {
    let invalid = value.is_empty()
        // Dot-prefixed names are reserved for cache metadata (and covers `.`
        // and `..` at the same time).
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0']);
    match invalid {
        true => exn::bail!(ErrorKind::InvalidKey(value.to_string())),
        false => Ok(()),
    }
}

/// Path resolver for a single cache root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}
impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.repository)
    }

    /// `<root>/<repository>/<asset>`
    pub fn asset_path(&self, key: &CacheKey) -> PathBuf {
        self.repository_dir(key).join(&key.asset)
    }

    pub fn covers_dir(&self, key: &CacheKey) -> PathBuf {
        self.repository_dir(key).join(COVERS_DIR)
    }

    /// Thumbnail extracted from the asset itself.
    pub fn extracted_cover_path(&self, key: &CacheKey) -> PathBuf {
        self.covers_dir(key).join(format!("{}.jpg", key.item_id))
    }

    /// Externally supplied cover; takes precedence over the extracted one.
    pub fn catalog_cover_path(&self, key: &CacheKey) -> PathBuf {
        self.covers_dir(key).join(format!("{}-catalog.jpg", key.item_id))
    }

    pub fn manifest_path(&self, key: &CacheKey) -> PathBuf {
        self.repository_dir(key).join(MANIFEST_FILE)
    }

    /// Generated by the index collaborator, never written by this crate.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }
}

/// Create a uniquely named temporary file next to `path`, so the final rename
/// stays atomic and concurrent writers never share a file.
///
/// The name is dot-prefixed and ends in `.tmp`, neither of which a valid key
/// can produce. The file is deleted on drop unless persisted.
pub(crate) fn temp_file(path: &Path) -> std::io::Result<NamedTempFile> {
    let mut prefix = OsString::from(".");
    prefix.push(path.file_name().unwrap_or_default());
    prefix.push(".");
    Builder::new()
        .prefix(&prefix)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(path.parent().unwrap_or(Path::new(".")))
}

/// Create `path` and any missing parents with owner-only permissions.
///
/// Idempotent: succeeds without changes once the directory exists.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await.or_raise(|| ErrorKind::DirectoryCreateFailed(path.to_path_buf()))
}
