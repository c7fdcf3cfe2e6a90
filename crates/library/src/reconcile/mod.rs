//! Synchronization reconciler.
//!
//! Classifies library items against the local cache and drives queued
//! transfers for the ones the caller selects. Jobs are drained in strict FIFO
//! order with exactly one transfer in flight at a time.
//!
//! The primary entry points are [`Reconciler::enqueue`] and
//! [`Reconciler::drain`], or [`Reconciler::sync`] which combines
//! classification, enqueueing and draining into one stream.

mod job;
mod queue;
mod stream;

pub use self::job::{JobId, JobState, TransferJob};
pub use self::stream::{SyncEvent, TransferEvent};
use self::queue::Queue;
use crate::item::Item;
use crate::library::Library;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Queue of transfer jobs over one [`Library`].
///
/// # Examples
///
/// ```no_run
/// use futures::StreamExt;
/// use shelf_library::{Item, Library, Reconciler, TransferEvent};
///
/// # async fn example(library: Library, selected: Vec<Item>, focused: Item) {
/// let reconciler = Reconciler::new(library);
/// reconciler.enqueue(selected, Some(focused));
/// let mut events = std::pin::pin!(reconciler.drain());
/// while let Some(event) = events.next().await {
///     if let TransferEvent::Failed { id, error } = event {
///         eprintln!("job {id} failed: {error:?}");
///     }
/// }
/// # }
/// ```
pub struct Reconciler {
    library: Library,
    queue: Arc<Queue>,
    // Held for the lifetime of a drain stream, so two drains never interleave.
    draining: Mutex<()>,
    // Held by the transfer task itself, so a task detached from a dropped
    // drain still blocks the next transfer until it has finished.
    transferring: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(library: Library) -> Self {
        Self {
            library,
            queue: Arc::new(Queue::default()),
            draining: Mutex::new(()),
            transferring: Arc::new(Mutex::new(())),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Queue a transfer for every `selected` item, or for the `focused` item
    /// when nothing is selected. Returns the new job ids in queue order; an
    /// empty vector means there was nothing to do.
    pub fn enqueue(&self, selected: Vec<Item>, focused: Option<Item>) -> Vec<JobId> {
        let items = if selected.is_empty() { focused.into_iter().collect() } else { selected };
        if items.is_empty() {
            tracing::debug!("Nothing selected or focused; no jobs queued");
            return Vec::new();
        }
        let ids = self.queue.push(items);
        tracing::debug!(jobs = ids.len(), "Queued transfers");
        ids
    }

    /// Jobs waiting to be drained, front first.
    pub fn pending(&self) -> Vec<TransferJob> {
        self.queue.queued()
    }

    /// The job currently transferring, if any.
    pub fn active(&self) -> Option<TransferJob> {
        self.queue.active()
    }

    /// Jobs that have succeeded or failed, in completion order.
    pub fn finished(&self) -> Vec<TransferJob> {
        self.queue.finished()
    }

    /// Look up a job in any state.
    pub fn job(&self, id: JobId) -> Option<TransferJob> {
        self.queue.find(id)
    }

    /// Drop every queued job, returning how many were dropped. The active
    /// job, if any, is unaffected.
    pub fn cancel(&self) -> usize {
        let cancelled = self.queue.clear();
        if cancelled > 0 {
            tracing::info!(jobs = cancelled, "Cancelled queued transfers");
        }
        cancelled
    }
}
