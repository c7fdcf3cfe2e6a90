//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Transport errors from `reqwest` are
//! attached as child frames; the kinds stay [`Clone`] so dependent crates can
//! re-raise them.

use derive_more::{Display, Error};

/// A remote error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which network request of an operation failed.
///
/// A size-tiered fetch issues a [`Metadata`](Self::Metadata) request and, for
/// oversized content, a follow-up [`Raw`](Self::Raw) request. Release asset
/// downloads issue a [`Release`](Self::Release) lookup followed by the
/// [`Asset`](Self::Asset) download itself.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[display("metadata")]
    Metadata,
    #[display("raw content")]
    Raw,
    #[display("release lookup")]
    Release,
    #[display("asset download")]
    Asset,
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request could not be sent, or the server answered with a non-2xx
    /// status (`status` is `None` for network-level failures).
    #[display(
        "{stage} request failed{}",
        status.map(|s| format!(" with HTTP {s}")).unwrap_or_default()
    )]
    FetchFailed {
        stage: Stage,
        status: Option<u16>,
    },
    /// The response body was not what the API promises.
    #[display("{_0} response was malformed")]
    InvalidResponse(#[error(not(source))] Stage),
    /// Inline content could not be decoded. Not retried.
    #[display("inline content could not be decoded")]
    DecodeFailed,
    /// The release exists but has no asset with this name.
    #[display("asset not found in release: {_0}")]
    AssetNotFound(#[error(not(source))] String),
    /// The client could not be constructed from its configuration.
    #[display("invalid remote configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { status: None, .. } => true,
            Self::FetchFailed { status: Some(status), .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The request stage this error is attributable to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::FetchFailed { stage, .. } | Self::InvalidResponse(stage) => Some(*stage),
            _ => None,
        }
    }
}
