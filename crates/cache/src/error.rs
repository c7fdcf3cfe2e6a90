//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Underlying I/O errors are attached as
//! child frames with [`or_raise`](exn::ResultExt::or_raise) so that the kinds
//! themselves stay [`Clone`] and can be re-raised by dependent crates.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A cache key component is empty, reserved, or would escape the cache root.
    #[display("invalid cache key component: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    /// The cache root is not an absolute directory.
    #[display("invalid cache root: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    /// The destination directory could not be created.
    #[display("failed to create directory: {}", _0.display())]
    DirectoryCreateFailed(#[error(not(source))] PathBuf),
    /// Writing or closing the temporary sibling file failed. The temporary file
    /// has already been removed.
    #[display("failed to write temporary file: {}", _0.display())]
    TempWriteFailed(#[error(not(source))] PathBuf),
    /// Content hash did not match the expected hash. Retrying with the same
    /// source will not help.
    #[display("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    /// The final rename onto the destination path failed.
    #[display("failed to move file into place: {}", _0.display())]
    RenameFailed(#[error(not(source))] PathBuf),
    /// A cached file could not be deleted (for reasons other than it already
    /// being gone).
    #[display("failed to remove file: {}", _0.display())]
    RemoveFailed(#[error(not(source))] PathBuf),
    /// A cached file could not be read for hashing.
    #[display("failed to read file: {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    /// The sync manifest could not be read, parsed, or written.
    #[display("invalid sync manifest: {}", _0.display())]
    Manifest(#[error(not(source))] PathBuf),
    /// External thumbnail extraction failed. Only ever logged.
    #[display("thumbnail extraction failed: {_0}")]
    Thumbnail(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryCreateFailed(_) | Self::TempWriteFailed(_) | Self::RenameFailed(_) | Self::RemoveFailed(_)
        )
    }
}
