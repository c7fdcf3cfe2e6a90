use super::job::{JobId, JobState, TransferJob};
use crate::error::{ErrorKind, Result};
use crate::item::Item;
use crate::progress::Progress;
use shelf_cache::StoredEntry;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    queued: VecDeque<TransferJob>,
    active: Option<TransferJob>,
    finished: Vec<TransferJob>,
}

/// FIFO job queue shared between the reconciler, its drain loop and the
/// transfer task currently running.
///
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    state: Mutex<State>,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, items: Vec<Item>) -> Vec<JobId> {
        let mut state = self.lock();
        items
            .into_iter()
            .map(|item| {
                state.next_id += 1;
                let id = JobId(state.next_id);
                state.queued.push_back(TransferJob::new(id, item));
                id
            })
            .collect()
    }

    /// Move the front job to the active slot. Refuses while another job is
    /// still active.
    pub(crate) fn activate_next(&self) -> Option<TransferJob> {
        let mut state = self.lock();
        if state.active.is_some() {
            return None;
        }
        let mut job = state.queued.pop_front()?;
        job.state = JobState::Active(Progress::new(0, job.size));
        state.active = Some(job.clone());
        Some(job)
    }

    pub(crate) fn update_progress(&self, id: JobId, progress: Progress) {
        let mut state = self.lock();
        if let Some(job) = state.active.as_mut().filter(|job| job.id == id) {
            job.state = JobState::Active(progress);
        }
    }

    /// Record the outcome of the active job. A no-op if `id` is no longer
    /// active, so the drain loop and a detached task can both call it.
    pub(crate) fn finish(&self, id: JobId, result: &Result<StoredEntry>) {
        let mut state = self.lock();
        if state.active.as_ref().is_none_or(|job| job.id != id) {
            return;
        }
        if let Some(mut job) = state.active.take() {
            job.state = match result {
                Ok(_) => JobState::Succeeded,
                Err(e) => JobState::Failed((**e).clone()),
            };
            state.finished.push(job);
        }
    }

    /// Fail an active job whose transfer task ended without recording an
    /// outcome. Only called while no transfer task is running.
    pub(crate) fn abandon_active(&self) -> Option<JobId> {
        let mut state = self.lock();
        let mut job = state.active.take()?;
        job.state = JobState::Failed(ErrorKind::Aborted);
        let id = job.id;
        state.finished.push(job);
        Some(id)
    }

    pub(crate) fn clear(&self) -> usize {
        let mut state = self.lock();
        let cancelled = state.queued.len();
        state.queued.clear();
        cancelled
    }

    pub(crate) fn queued(&self) -> Vec<TransferJob> {
        self.lock().queued.iter().cloned().collect()
    }

    pub(crate) fn active(&self) -> Option<TransferJob> {
        self.lock().active.clone()
    }

    pub(crate) fn finished(&self) -> Vec<TransferJob> {
        self.lock().finished.clone()
    }

    pub(crate) fn find(&self, id: JobId) -> Option<TransferJob> {
        let state = self.lock();
        state
            .active
            .iter()
            .chain(state.queued.iter())
            .chain(state.finished.iter())
            .find(|job| job.id == id)
            .cloned()
    }
}
