//! Synchronization engine for a shelf library.
//!
//! Ties the local [cache](shelf_cache) to the [remote](shelf_remote) store.
//! [`Library`] is the interface handed to the interactive layer: download,
//! uncache, and cache-state queries for single items. [`Reconciler`] queues
//! transfers for many items and drains them one at a time, streaming progress.

pub mod error;
mod item;
mod library;
pub mod progress;
mod reconcile;

pub use crate::item::{CatalogCover, Item, SyncState};
pub use crate::library::{Fetched, Library};
pub use crate::progress::Progress;
pub use crate::reconcile::{JobId, JobState, Reconciler, SyncEvent, TransferEvent, TransferJob};
