//! Best-effort progress delivery.
//!
//! Progress is advisory. A slow or departed consumer never stalls a transfer:
//! the queue's drain loop reads from a [`watch`] channel where the latest value
//! wins, and direct callers supply an [`mpsc`] channel that is written to with
//! `try_send` and silently skipped when full or closed.

use derive_more::Display;
use tokio::sync::{mpsc, watch};

/// Bytes transferred so far out of the expected total.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
#[display("{transferred}/{total}")]
pub struct Progress {
    pub transferred: u64,
    /// Zero when unknown.
    pub total: u64,
}

impl Progress {
    pub fn new(transferred: u64, total: u64) -> Self {
        Self { transferred, total }
    }

    /// Completed fraction in `0.0..=1.0`, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.transferred.min(self.total) as f64) / (self.total as f64))
    }
}

#[derive(Debug, Default)]
pub(crate) enum Reporter {
    #[default]
    Silent,
    Latest(watch::Sender<Progress>),
    Channel(mpsc::Sender<Progress>),
}

impl Reporter {
    pub(crate) fn report(&self, progress: Progress) {
        match self {
            Self::Silent => {},
            Self::Latest(tx) => {
                tx.send_replace(progress);
            },
            Self::Channel(tx) => {
                if let Err(e) = tx.try_send(progress) {
                    tracing::trace!(error = %e, %progress, "Progress update dropped");
                }
            },
        }
    }
}
