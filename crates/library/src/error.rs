//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the cache and remote
//! crates are re-raised with their own frames kept as children.

use derive_more::{Display, Error};
use shelf_cache::error::{Error as CacheError, ErrorKind as CacheErrorKind};
use shelf_remote::error::{Error as RemoteError, ErrorKind as RemoteErrorKind};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a library failure.
///
/// ### Dependency Errors
/// - [`ErrorKind::Cache`]
/// - [`ErrorKind::Remote`]
///
/// ### Operational Errors
/// - [`ErrorKind::Aborted`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A local cache operation failed.
    #[display("cache error: {_0}")]
    Cache(CacheErrorKind),
    /// A request to the remote store failed.
    #[display("remote error: {_0}")]
    Remote(RemoteErrorKind),
    /// The transfer task panicked or was cancelled by the runtime.
    #[display("transfer aborted")]
    Aborted,
}

impl ErrorKind {
    /// Convert a cache error into a library error, preserving the cache
    /// crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn cache(err: CacheError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Cache(inner))
    }

    /// Convert a remote error into a library error, preserving the remote
    /// crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn remote(err: RemoteError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Remote(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(kind) => kind.is_retryable(),
            Self::Remote(kind) => kind.is_retryable(),
            Self::Aborted => false,
        }
    }
}
