//! Read-only client for the remote hosting store.
//!
//! The catalog and its documents are canonical in a remote repository; this
//! crate fetches them. Files addressed by path go through
//! [`ContentSource::fetch`], which hides the provider's size tiering. Large
//! documents attached to releases are streamed with
//! [`ContentSource::open_asset`].

pub mod error;
mod models;
pub mod source;

pub use crate::models::{AssetDownload, AssetRef, BoxAsyncRead, ContentRef, INLINE_LIMIT, RemoteContent};
#[cfg(feature = "mock")]
pub use crate::source::MockSource;
pub use crate::source::{ContentSource, HttpSource};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn ContentSource + Send + Sync>;
