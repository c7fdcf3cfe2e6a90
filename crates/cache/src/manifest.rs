//! Per-repository record of the last successful sync.
//!
//! The manifest is what makes divergence detection possible without asking the
//! remote: it remembers the hash of the content as it was fetched, and the
//! remote content token needed for a future conditional update.

use crate::error::{ErrorKind, Result};
use crate::path::temp_file;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// What was known about an asset the last time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Hash of the content as fetched.
    pub hash: String,
    /// Remote content token (entity tag) captured at fetch time, if the remote
    /// provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_token: Option<String>,
    /// Unix timestamp (seconds) of the sync.
    pub synced_at: i64,
}
impl SyncRecord {
    pub fn new(hash: impl Into<String>, content_token: Option<String>) -> Self {
        Self {
            hash: hash.into(),
            content_token,
            synced_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn synced_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.synced_at).ok()
    }
}

/// Asset filename to [`SyncRecord`], stored as `.sync.json`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    #[serde(default)]
    pub(crate) assets: BTreeMap<String, SyncRecord>,
}
impl Manifest {
    /// A manifest that doesn't exist yet is an empty one.
    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Manifest(path.to_path_buf())),
        };
        serde_json::from_slice(&data).or_raise(|| ErrorKind::Manifest(path.to_path_buf()))
    }

    /// Written with the same temp-file-then-rename protocol as assets.
    pub(crate) async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self).or_raise(|| ErrorKind::Manifest(path.to_path_buf()))?;
        let (file, tmp) = temp_file(path).or_raise(|| ErrorKind::TempWriteFailed(path.to_path_buf()))?.into_parts();
        let mut file = fs::File::from_std(file);
        file.write_all(&data).await.or_raise(|| ErrorKind::TempWriteFailed(tmp.to_path_buf()))?;
        file.sync_all().await.or_raise(|| ErrorKind::TempWriteFailed(tmp.to_path_buf()))?;
        drop(file);
        tmp.persist(path)
            .map_err(|e| e.error)
            .or_raise(|| ErrorKind::RenameFailed(path.to_path_buf()))
    }
}
