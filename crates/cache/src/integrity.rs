//! Content hashing and verification.
//!
//! The single source of truth for "is this file intact / unmodified". Hashes
//! are BLAKE3 digests rendered as 64 lowercase hex characters, and are compared
//! as strings on both sides.
//!
//! An expected hash of `None` (or the empty string) is the "unknown" sentinel:
//! verification is skipped and always succeeds, so that first-time stores
//! without a prior checksum can proceed.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use tracing::instrument;

/// Hash an in-memory buffer.
///
/// ```
/// let hash = shelf_cache::integrity::hash_bytes(b"hello");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_string()
}

/// Hash the content of the file at `path`.
///
/// Hashing runs on the blocking pool so that large assets don't stall the
/// runtime.
pub async fn hash_file(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    let joined = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let file = std::fs::File::open(&owned)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(file)?;
        Ok(hasher.finalize().to_string())
    })
    .await
    .or_raise(|| ErrorKind::Read(path.to_path_buf()))?;
    joined.or_raise(|| ErrorKind::Read(path.to_path_buf()))
}

/// Normalise the "unknown hash" sentinel.
pub(crate) fn expected(hash: Option<&str>) -> Option<&str> {
    hash.filter(|h| !h.is_empty())
}

/// Verify the file at `path` against `expected`.
///
/// Returns the file's actual hash, or `None` when verification was skipped
/// because no expected hash was given. Fails with
/// [`ChecksumMismatch`](ErrorKind::ChecksumMismatch) carrying both hashes.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn verify(path: &Path, expected_hash: Option<&str>) -> Result<Option<String>> {
    let Some(expected_hash) = expected(expected_hash) else {
        tracing::trace!("No expected hash; skipping verification");
        return Ok(None);
    };
    let actual = hash_file(path).await?;
    if actual != expected_hash {
        exn::bail!(ErrorKind::ChecksumMismatch { expected: expected_hash.to_string(), actual });
    }
    Ok(Some(actual))
}

/// Returns `true` only if the file exists and its content no longer matches
/// `recorded_hash`.
///
/// Never fails: a missing file has nothing to diverge from, and an unknown
/// recorded hash can't be diverged from either. A file that exists but can't
/// be read is reported as diverged.
pub async fn has_diverged(path: &Path, recorded_hash: Option<&str>) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(true) => {},
        Ok(false) => return false,
        Err(e) if e.kind() == IoErrorKind::NotFound => return false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not check existence; assuming diverged");
            return true;
        },
    }
    match verify(path, recorded_hash).await {
        Ok(_) => false,
        Err(e) => {
            match &*e {
                ErrorKind::ChecksumMismatch { expected, actual } => {
                    tracing::debug!(path = %path.display(), %expected, %actual, "Cached file has diverged");
                },
                other => tracing::warn!(path = %path.display(), error = %other, "Could not hash cached file"),
            }
            true
        },
    }
}
