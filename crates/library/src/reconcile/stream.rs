use super::Reconciler;
use super::job::{JobId, TransferJob};
use crate::error::{Error, ErrorKind, Result};
use crate::item::{Item, SyncState};
use crate::progress::{Progress, Reporter};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use shelf_cache::StoredEntry;
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, watch};
use tokio::task::JoinError;

/// Events emitted by [`Reconciler::drain`].
///
/// For each job: [`Started`](Self::Started), zero or more
/// [`Progress`](Self::Progress), then exactly one of
/// [`Succeeded`](Self::Succeeded) or [`Failed`](Self::Failed).
/// [`Complete`](Self::Complete) is emitted once the queue is empty.
#[derive(Debug)]
pub enum TransferEvent {
    Started { id: JobId, item: Item },
    /// Latest progress of the active job. Intermediate values may be skipped.
    Progress { id: JobId, progress: Progress },
    Succeeded { id: JobId, entry: StoredEntry },
    /// The job failed; the drain continues with the next job.
    Failed { id: JobId, error: Error },
    Complete { succeeded: usize, failed: usize },
}

/// Events emitted by [`Reconciler::sync`].
#[derive(Debug)]
pub enum SyncEvent {
    /// The cache state of an item, emitted for every item before any transfer.
    Classified { item: Item, state: SyncState },
    Transfer(TransferEvent),
}

enum Step {
    Progress(Progress),
    ProgressClosed,
    Done(std::result::Result<Result<StoredEntry>, JoinError>),
}

impl Reconciler {
    /// Transfer queued jobs one at a time until the queue is empty, including
    /// jobs queued while draining.
    ///
    /// A failed job is reported and does not stop the drain. Dropping the
    /// stream abandons the active job's events but not the job: its transfer
    /// runs to completion in the background and its state is still recorded.
    pub fn drain(&self) -> impl Stream<Item = TransferEvent> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let _draining = self.draining.lock().await;
            let (mut succeeded, mut failed) = (0, 0);

            while let Some((job, transferring)) = self.next_job().await {
                let id = job.id;
                tracing::debug!(job = %id, key = %job.item.key, "Transfer started");
                yield TransferEvent::Started { id, item: job.item.clone() };

                let (tx, mut rx) = watch::channel(Progress::new(0, job.size));
                let library = self.library.clone();
                let queue = Arc::clone(&self.queue);
                let item = job.item;
                let mut handle = tokio::spawn(async move {
                    let result = library.transfer_reporting(&item, Reporter::Latest(tx)).await;
                    queue.finish(id, &result);
                    drop(transferring);
                    result
                });

                let mut progress_open = true;
                let joined = loop {
                    let step = tokio::select! {
                        changed = rx.changed(), if progress_open => match changed {
                            Ok(()) => Step::Progress(*rx.borrow_and_update()),
                            Err(_) => Step::ProgressClosed,
                        },
                        joined = &mut handle => Step::Done(joined),
                    };
                    match step {
                        Step::Progress(progress) => {
                            self.queue.update_progress(id, progress);
                            yield TransferEvent::Progress { id, progress };
                        },
                        Step::ProgressClosed => progress_open = false,
                        Step::Done(joined) => break joined,
                    }
                };

                let result = joined.or_raise(|| ErrorKind::Aborted).and_then(|result| result);
                // Already recorded by the task unless it panicked.
                self.queue.finish(id, &result);
                match result {
                    Ok(entry) => {
                        succeeded += 1;
                        yield TransferEvent::Succeeded { id, entry };
                    },
                    Err(error) => {
                        failed += 1;
                        tracing::warn!(job = %id, error = ?error, "Transfer failed");
                        yield TransferEvent::Failed { id, error };
                    },
                }
            }

            yield TransferEvent::Complete { succeeded, failed };
        })
    }

    /// Wait for any transfer still running (possibly detached from a dropped
    /// drain), then activate the front job.
    async fn next_job(&self) -> Option<(TransferJob, OwnedMutexGuard<()>)> {
        let transferring = Arc::clone(&self.transferring).lock_owned().await;
        if let Some(id) = self.queue.abandon_active() {
            tracing::warn!(job = %id, "Transfer task ended without an outcome");
        }
        let job = self.queue.activate_next()?;
        Some((job, transferring))
    }

    /// Classify every item, then download the absent ones.
    ///
    /// Modified items are only reported: whether to push them back upstream
    /// or discard the local changes is the caller's decision. Clean items need
    /// nothing. When no item is absent, no transfer events follow.
    pub fn sync(&self, items: Vec<Item>) -> impl Stream<Item = SyncEvent> + '_ {
        stream!({
            let mut absent = Vec::new();
            for item in items {
                let state = self.library.state(&item).await;
                if state == SyncState::Absent {
                    absent.push(item.clone());
                }
                yield SyncEvent::Classified { item, state };
            }
            if absent.is_empty() {
                return;
            }
            self.enqueue(absent, None);
            for await event in self.drain() {
                yield SyncEvent::Transfer(event);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Library;
    use crate::reconcile::JobState;
    use futures::StreamExt;
    use shelf_cache::error::ErrorKind as CacheErrorKind;
    use shelf_cache::integrity::hash_bytes;
    use shelf_cache::{CacheKey, CacheStore};
    use shelf_remote::MockSource;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(source: MockSource) -> (TempDir, Reconciler, Arc<MockSource>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(temp_dir.path()).unwrap();
        let source = Arc::new(source);
        let reconciler = Reconciler::new(Library::new(cache, source.clone()));
        (temp_dir, reconciler, source)
    }

    fn item(asset: &str, content: &[u8]) -> Item {
        Item::new(CacheKey::new("me", "books", asset, asset), "v1")
            .with_size(content.len() as u64)
            .with_expected_hash(hash_bytes(content))
    }

    fn three_books() -> MockSource {
        MockSource::default()
            .with_asset("v1", "one.pdf", b"first book")
            .with_asset("v1", "two.pdf", b"second book")
            .with_asset("v1", "three.pdf", b"third book")
    }

    #[tokio::test]
    async fn test_failed_job_does_not_block_batch() {
        let (_temp_dir, reconciler, _source) = setup(three_books());
        let one = item("one.pdf", b"first book");
        let two = item("two.pdf", b"second book").with_expected_hash(hash_bytes(b"never matches"));
        let three = item("three.pdf", b"third book");
        let ids = reconciler.enqueue(vec![one.clone(), two.clone(), three.clone()], None);
        assert_eq!(ids.len(), 3);

        let events: Vec<TransferEvent> = reconciler.drain().collect().await;
        let started: Vec<JobId> = events
            .iter()
            .filter_map(|event| match event {
                TransferEvent::Started { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(started, ids);
        assert!(matches!(events.last(), Some(TransferEvent::Complete { succeeded: 2, failed: 1 })));
        let failure = events.iter().find_map(|event| match event {
            TransferEvent::Failed { id, error } => Some((*id, (**error).clone())),
            _ => None,
        });
        let (failed_id, kind) = failure.unwrap();
        assert_eq!(failed_id, ids[1]);
        assert!(matches!(kind, ErrorKind::Cache(CacheErrorKind::ChecksumMismatch { .. })));

        assert_eq!(reconciler.job(ids[0]).unwrap().state, JobState::Succeeded);
        assert!(matches!(
            reconciler.job(ids[1]).unwrap().state,
            JobState::Failed(ErrorKind::Cache(CacheErrorKind::ChecksumMismatch { .. }))
        ));
        assert_eq!(reconciler.job(ids[2]).unwrap().state, JobState::Succeeded);

        let cache = reconciler.library().cache();
        assert!(cache.exists(&one.key).await);
        assert!(!cache.exists(&two.key).await);
        assert!(cache.exists(&three.key).await);
        assert_eq!(std::fs::read(cache.layout().asset_path(&three.key)).unwrap(), b"third book");
        assert!(reconciler.pending().is_empty());
        assert!(reconciler.active().is_none());
        assert_eq!(reconciler.finished().len(), 3);
    }

    #[test]
    fn test_enqueue_falls_back_to_focused() {
        let (_temp_dir, reconciler, _source) = setup(MockSource::default());
        let focused = item("one.pdf", b"first book");

        assert!(reconciler.enqueue(Vec::new(), None).is_empty());
        let ids = reconciler.enqueue(Vec::new(), Some(focused.clone()));
        assert_eq!(ids.len(), 1);
        assert_eq!(reconciler.pending()[0].item, focused);

        let selected = vec![item("two.pdf", b"x"), item("three.pdf", b"y")];
        let ids = reconciler.enqueue(selected, Some(focused));
        assert_eq!(ids.len(), 2);
        let pending: Vec<_> = reconciler.pending().into_iter().map(|job| job.item.key.asset).collect();
        assert_eq!(pending, ["one.pdf", "two.pdf", "three.pdf"]);
        assert!(reconciler.pending().iter().all(|job| job.state == JobState::Queued));
    }

    #[tokio::test]
    async fn test_cancel_clears_queue() {
        let (_temp_dir, reconciler, source) = setup(three_books());
        reconciler.enqueue(vec![item("one.pdf", b"first book"), item("two.pdf", b"second book")], None);

        assert_eq!(reconciler.cancel(), 2);
        assert_eq!(reconciler.cancel(), 0);
        let events: Vec<TransferEvent> = reconciler.drain().collect().await;
        assert!(matches!(events.as_slice(), [TransferEvent::Complete { succeeded: 0, failed: 0 }]));
        assert_eq!(source.opened(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_reported_in_order() {
        let content = vec![42u8; 512 * 1024];
        let source = MockSource::default().with_asset("v1", "big.pdf", content.clone());
        let (_temp_dir, reconciler, _source) = setup(source);
        let id = reconciler.enqueue(vec![item("big.pdf", &content)], None)[0];

        let events: Vec<TransferEvent> = reconciler.drain().collect().await;
        let progress: Vec<Progress> = events
            .iter()
            .filter_map(|event| match event {
                TransferEvent::Progress { id: event_id, progress } if *event_id == id => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0].transferred <= w[1].transferred));
        assert!(progress.iter().all(|p| p.total == content.len() as u64));
        assert!(matches!(events.last(), Some(TransferEvent::Complete { succeeded: 1, failed: 0 })));
    }

    #[tokio::test]
    async fn test_dropped_drain_detaches_transfer() {
        let (_temp_dir, reconciler, _source) = setup(three_books());
        let one = item("one.pdf", b"first book");
        let id = reconciler.enqueue(vec![one.clone()], None)[0];

        {
            let mut events = std::pin::pin!(reconciler.drain());
            assert!(matches!(events.next().await, Some(TransferEvent::Started { .. })));
            // Poll once more so the transfer task is spawned, then abandon it.
            let _ = tokio::time::timeout(Duration::from_millis(1), events.next()).await;
        }

        let finished = async {
            while !reconciler.job(id).is_some_and(|job| job.state.is_finished()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), finished).await.unwrap();
        assert_eq!(reconciler.job(id).unwrap().state, JobState::Succeeded);
        assert!(reconciler.library().cache().exists(&one.key).await);
    }

    #[tokio::test]
    async fn test_redrain_waits_for_detached_transfer() {
        let big = vec![7u8; 32 * 1024 * 1024];
        let source = three_books().with_asset("v1", "big.pdf", big.clone());
        let (_temp_dir, reconciler, _source) = setup(source);
        let first = reconciler.enqueue(vec![item("big.pdf", &big)], None)[0];

        {
            let mut events = std::pin::pin!(reconciler.drain());
            assert!(matches!(events.next().await, Some(TransferEvent::Started { .. })));
            let _ = tokio::time::timeout(Duration::from_millis(1), events.next()).await;
        }

        let second = reconciler.enqueue(vec![item("one.pdf", b"first book")], None)[0];
        let mut events = std::pin::pin!(reconciler.drain());
        let mut started = Vec::new();
        while let Some(event) = events.next().await {
            if let TransferEvent::Started { id, .. } = event {
                assert!(reconciler.job(first).is_some_and(|job| job.state.is_finished()));
                started.push(id);
            }
        }
        assert_eq!(started, [second]);

        assert_eq!(reconciler.job(first).unwrap().state, JobState::Succeeded);
        assert_eq!(reconciler.job(second).unwrap().state, JobState::Succeeded);
        let finished: Vec<JobId> = reconciler.finished().into_iter().map(|job| job.id).collect();
        assert_eq!(finished, [first, second]);
    }

    #[tokio::test]
    async fn test_sync_classifies_then_fetches_absent() {
        let (_temp_dir, reconciler, source) = setup(three_books());
        let clean = item("one.pdf", b"first book");
        let modified = item("two.pdf", b"second book");
        let absent = item("three.pdf", b"third book");
        let library = reconciler.library();
        library.download(&clean).await.unwrap();
        let modified_path = library.download(&modified).await.unwrap().path().clone();
        std::fs::write(&modified_path, b"second book, annotated").unwrap();

        let events: Vec<SyncEvent> =
            reconciler.sync(vec![clean.clone(), modified.clone(), absent.clone()]).collect().await;
        let classified: Vec<(String, SyncState)> = events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Classified { item, state } => Some((item.key.asset.clone(), *state)),
                SyncEvent::Transfer(_) => None,
            })
            .collect();
        assert_eq!(
            classified,
            [
                ("one.pdf".to_string(), SyncState::Clean),
                ("two.pdf".to_string(), SyncState::Modified),
                ("three.pdf".to_string(), SyncState::Absent),
            ]
        );
        assert!(events[..3].iter().all(|event| matches!(event, SyncEvent::Classified { .. })));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::Transfer(TransferEvent::Complete { succeeded: 1, failed: 0 }))
        ));
        assert_eq!(std::fs::read(&modified_path).unwrap(), b"second book, annotated");
        assert_eq!(library.state(&absent).await, SyncState::Clean);
        assert_eq!(source.opened(), 3);
    }

    #[tokio::test]
    async fn test_sync_without_absent_items_transfers_nothing() {
        let (_temp_dir, reconciler, source) = setup(three_books());
        let clean = item("one.pdf", b"first book");
        reconciler.library().download(&clean).await.unwrap();

        let events: Vec<SyncEvent> = reconciler.sync(vec![clean]).collect().await;
        assert!(matches!(events.as_slice(), [SyncEvent::Classified { state: SyncState::Clean, .. }]));
        assert_eq!(source.opened(), 1);
    }
}
