use crate::error::ErrorKind;
use crate::item::Item;
use crate::progress::Progress;
use derive_more::Display;

/// Identifies a [`TransferJob`] within one [`Reconciler`](super::Reconciler).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
pub struct JobId(pub(crate) u64);

/// Lifecycle of a job: `Queued → Active → {Succeeded, Failed}`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    /// Currently transferring; holds the latest progress seen.
    Active(Progress),
    Succeeded,
    Failed(ErrorKind),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferJob {
    pub id: JobId,
    pub item: Item,
    /// Expected size in bytes, as known when the job was queued.
    pub size: u64,
    pub state: JobState,
}

impl TransferJob {
    pub(crate) fn new(id: JobId, item: Item) -> Self {
        let size = item.size;
        Self { id, item, size, state: JobState::Queued }
    }
}
