//! Asynchronous soft-delete pipeline.
//!
//! A deletion request is handled in two stages, both off the caller's task:
//!
//! 1. **Verification**: one short-lived task per request decodes the codes and
//!    keeps only the links the requester owns that are not deleted yet.
//! 2. **Purge**: a single long-lived worker collects verified ids from a
//!    bounded queue and marks them deleted in bulk, either when the batch is
//!    full or when the flush timer fires with a non-empty batch.
//!
//! A full queue blocks the verification task until the worker catches up; ids
//! are never dropped on the way in. A failed flush is logged and its batch is
//! discarded, so deletion is at-most-once. A request's ticket resolves once
//! all of its ids have been flushed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tinylink_core::{DeletionNotifier, DeletionOutcome, DeletionTicket, ShortCode, StorageError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

/// Tuning knobs for the purge stage.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct PurgeConfig {
    /// Number of queued ids that forces a flush.
    #[builder(default = 10)]
    pub batch_capacity: usize,
    /// Period of the flush timer.
    #[builder(default = Duration::from_secs(10))]
    pub flush_interval: Duration,
    /// Capacity of the queue between verification and purge.
    #[builder(default = 1024)]
    pub queue_capacity: usize,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Storage operations the pipeline needs.
#[async_trait]
pub trait PurgeStore: Send + Sync + 'static {
    /// Returns the subset of `ids` owned by `user_id` that is not deleted yet.
    async fn owned_active(&self, user_id: &str, ids: &[u64]) -> Result<Vec<u64>, StorageError>;

    /// Marks every id in `ids` deleted in one operation and returns the number
    /// of links that changed state.
    async fn mark_deleted(&self, ids: &[u64]) -> Result<u64, StorageError>;
}

/// Progress of one request, shared by all of its queued ids.
///
/// The notifier fires once every id has been through a flush. Any failed
/// flush turns the outcome into [`DeletionOutcome::FlushFailed`].
#[derive(Debug)]
struct Completion {
    verified: usize,
    state: Mutex<CompletionState>,
}

#[derive(Debug)]
struct CompletionState {
    remaining: usize,
    failure: Option<String>,
    notifier: Option<DeletionNotifier>,
}

impl Completion {
    fn new(verified: usize, notifier: DeletionNotifier) -> Self {
        Self {
            verified,
            state: Mutex::new(CompletionState {
                remaining: verified,
                failure: None,
                notifier: Some(notifier),
            }),
        }
    }

    fn settle(&self, failure: Option<&str>) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if let (None, Some(reason)) = (&state.failure, failure) {
            state.failure = Some(reason.to_string());
        }
        if state.remaining > 0 {
            return;
        }
        let Some(notifier) = state.notifier.take() else {
            return;
        };
        let outcome = match state.failure.take() {
            None => DeletionOutcome::Purged {
                verified: self.verified,
            },
            Some(reason) => DeletionOutcome::FlushFailed {
                verified: self.verified,
                reason,
            },
        };
        notifier.notify(outcome);
    }
}

#[derive(Debug)]
struct PendingDeletion {
    link_id: u64,
    completion: Arc<Completion>,
}

/// Handle to a running deletion pipeline.
pub struct DeletionPipeline {
    store: Arc<dyn PurgeStore>,
    sender: Mutex<Option<mpsc::Sender<PendingDeletion>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl std::fmt::Debug for DeletionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionPipeline")
            .field("accepting", &self.sender.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl DeletionPipeline {
    /// Spawns the purge worker.
    ///
    /// Zero capacities are raised to one and a zero interval to one millisecond.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(store: Arc<dyn PurgeStore>, config: PurgeConfig) -> Self {
        let config = PurgeConfig {
            batch_capacity: config.batch_capacity.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
            queue_capacity: config.queue_capacity.max(1),
        };
        let runtime = Handle::current();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let worker = runtime.spawn(run_worker(Arc::clone(&store), receiver, config));

        Self {
            store,
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            runtime,
        }
    }

    /// Queues a deletion request and returns without waiting for it.
    pub fn request(&self, user_id: &str, codes: Vec<String>) -> DeletionTicket {
        let (notifier, ticket) = DeletionTicket::channel();

        let Some(sender) = self.sender.lock().clone() else {
            warn!(user_id, "Deletion requested after shutdown, ignoring");
            notifier.notify(DeletionOutcome::Rejected);
            return ticket;
        };

        self.runtime.spawn(verify(
            Arc::clone(&self.store),
            sender,
            user_id.to_string(),
            codes,
            notifier,
        ));
        ticket
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) is called.
    pub fn is_accepting(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stops accepting requests, waits for in-flight verifications, flushes the
    /// last batch and stops the worker. Later calls return immediately.
    pub async fn shutdown(&self) {
        // Verification tasks hold their own senders; the worker sees the queue
        // close only once all of them are done.
        drop(self.sender.lock().take());

        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        if let Err(e) = worker.await {
            error!(error = %e, "Purge worker terminated abnormally");
        }
    }
}

async fn verify(
    store: Arc<dyn PurgeStore>,
    sender: mpsc::Sender<PendingDeletion>,
    user_id: String,
    codes: Vec<String>,
    notifier: DeletionNotifier,
) {
    let mut ids: Vec<u64> = codes
        .into_iter()
        .filter_map(|code| match ShortCode::parse(code) {
            Ok(code) => Some(code.id()),
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "Skipping undecodable code in deletion request");
                None
            }
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        notifier.notify(DeletionOutcome::NothingToDelete);
        return;
    }

    let verified = match store.owned_active(&user_id, &ids).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Ownership check failed, deletion request dropped");
            notifier.notify(DeletionOutcome::VerificationFailed(e.to_string()));
            return;
        }
    };

    debug!(
        user_id = %user_id,
        requested = ids.len(),
        verified = verified.len(),
        "Verified deletion request"
    );

    let count = verified.len();
    if count == 0 {
        notifier.notify(DeletionOutcome::NothingToDelete);
        return;
    }

    let completion = Arc::new(Completion::new(count, notifier));
    for link_id in verified {
        let pending = PendingDeletion {
            link_id,
            completion: Arc::clone(&completion),
        };
        if sender.send(pending).await.is_err() {
            warn!(user_id = %user_id, "Purge worker is gone, dropping verified deletions");
            return;
        }
    }
}

async fn run_worker(
    store: Arc<dyn PurgeStore>,
    mut receiver: mpsc::Receiver<PendingDeletion>,
    config: PurgeConfig,
) {
    let mut batch = Vec::with_capacity(config.batch_capacity);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            pending = receiver.recv() => match pending {
                Some(pending) => {
                    batch.push(pending);
                    if batch.len() >= config.batch_capacity {
                        flush(store.as_ref(), &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(store.as_ref(), &mut batch).await;
                }
            }
        }
    }

    if !batch.is_empty() {
        flush(store.as_ref(), &mut batch).await;
    }
    debug!("Purge worker stopped");
}

async fn flush(store: &dyn PurgeStore, batch: &mut Vec<PendingDeletion>) {
    let mut ids: Vec<u64> = batch.iter().map(|pending| pending.link_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let result = store.mark_deleted(&ids).await;
    match &result {
        Ok(rows) => info!(batch = ids.len(), rows, "Flushed deletion batch"),
        Err(e) => error!(batch = ids.len(), error = %e, "Deletion batch failed, dropping it"),
    }

    let failure = result.as_ref().err().map(ToString::to_string);
    for pending in batch.drain(..) {
        pending.completion.settle(failure.as_deref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStore {
        owners: HashMap<String, HashSet<u64>>,
        deleted: Mutex<HashSet<u64>>,
        flushes: Mutex<Vec<Vec<u64>>>,
        fail_flush: AtomicBool,
        failing_flushes: AtomicUsize,
        fail_verify: AtomicBool,
    }

    impl FakeStore {
        fn with_owner(mut self, user_id: &str, ids: impl IntoIterator<Item = u64>) -> Self {
            self.owners
                .entry(user_id.to_string())
                .or_default()
                .extend(ids);
            self
        }

        fn flushes(&self) -> Vec<Vec<u64>> {
            self.flushes.lock().clone()
        }

        fn is_deleted(&self, id: u64) -> bool {
            self.deleted.lock().contains(&id)
        }
    }

    #[async_trait]
    impl PurgeStore for FakeStore {
        async fn owned_active(
            &self,
            user_id: &str,
            ids: &[u64],
        ) -> Result<Vec<u64>, StorageError> {
            if self.fail_verify.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("verify".into()));
            }
            let deleted = self.deleted.lock();
            let owned = self.owners.get(user_id);
            Ok(ids
                .iter()
                .copied()
                .filter(|id| owned.is_some_and(|o| o.contains(id)) && !deleted.contains(id))
                .collect())
        }

        async fn mark_deleted(&self, ids: &[u64]) -> Result<u64, StorageError> {
            let fail_next = self
                .failing_flushes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail_next || self.fail_flush.load(Ordering::SeqCst) {
                return Err(StorageError::Query("flush".into()));
            }
            self.flushes.lock().push(ids.to_vec());
            let mut deleted = self.deleted.lock();
            Ok(ids.iter().filter(|id| deleted.insert(**id)).count() as u64)
        }
    }

    fn codes(ids: impl IntoIterator<Item = u64>) -> Vec<String> {
        ids.into_iter()
            .map(|id| ShortCode::from_id(id).to_string())
            .collect()
    }

    fn slow_timer(batch_capacity: usize) -> PurgeConfig {
        PurgeConfig::builder()
            .batch_capacity(batch_capacity)
            .flush_interval(Duration::from_secs(3600))
            .build()
    }

    #[test]
    fn default_config() {
        let config = PurgeConfig::default();
        assert_eq!(config.batch_capacity, 10);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 1024);
    }

    #[tokio::test]
    async fn full_batch_flushes_without_timer() {
        let store = Arc::new(FakeStore::default().with_owner("u1", 1..=3));
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(3));

        let ticket = pipeline.request("u1", codes(1..=3));

        assert_eq!(
            ticket.outcome().await,
            Some(DeletionOutcome::Purged { verified: 3 })
        );
        assert_eq!(store.flushes(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timer_flushes_partial_batch() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [7]));
        let config = PurgeConfig::builder()
            .flush_interval(Duration::from_millis(50))
            .build();
        let pipeline = DeletionPipeline::start(store.clone(), config);

        let _ = pipeline.request("u1", codes([7]));

        awaitility::at_most(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(20))
            .until_async(|| async { store.is_deleted(7) })
            .await;
        assert_eq!(store.flushes().len(), 1);
    }

    #[tokio::test]
    async fn only_owned_links_are_deleted() {
        let store = Arc::new(
            FakeStore::default()
                .with_owner("u1", [1, 2])
                .with_owner("u2", [3]),
        );
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(10));

        let mut requested = codes([1, 3, 99]);
        requested.push("not-a-code".to_string());
        let ticket = pipeline.request("u1", requested);
        pipeline.shutdown().await;

        assert_eq!(
            ticket.outcome().await,
            Some(DeletionOutcome::Purged { verified: 1 })
        );
        assert!(store.is_deleted(1));
        assert!(!store.is_deleted(2));
        assert!(!store.is_deleted(3));
    }

    #[tokio::test]
    async fn unowned_request_queues_nothing() {
        let store = Arc::new(FakeStore::default().with_owner("u2", [3]));
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(1));

        let ticket = pipeline.request("u1", codes([3]));

        assert_eq!(ticket.outcome().await, Some(DeletionOutcome::NothingToDelete));
        pipeline.shutdown().await;
        assert!(store.flushes().is_empty());
    }

    #[tokio::test]
    async fn already_deleted_links_are_skipped() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [1]));
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(1));

        let first = pipeline.request("u1", codes([1]));
        assert_eq!(
            first.outcome().await,
            Some(DeletionOutcome::Purged { verified: 1 })
        );

        let second = pipeline.request("u1", codes([1]));
        assert_eq!(second.outcome().await, Some(DeletionOutcome::NothingToDelete));
        assert_eq!(store.flushes().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_batch() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [1, 2]));
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(10));

        let ticket = pipeline.request("u1", codes([1, 2]));
        pipeline.shutdown().await;

        assert!(store.is_deleted(1));
        assert!(store.is_deleted(2));
        assert_eq!(
            ticket.outcome().await,
            Some(DeletionOutcome::Purged { verified: 2 })
        );
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_rejected() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [1]));
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(10));

        pipeline.shutdown().await;
        pipeline.shutdown().await;

        assert!(!pipeline.is_accepting());
        let ticket = pipeline.request("u1", codes([1]));
        assert_eq!(ticket.outcome().await, Some(DeletionOutcome::Rejected));
        assert!(!store.is_deleted(1));
    }

    #[tokio::test]
    async fn failed_flush_drops_batch() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [1, 2]));
        store.fail_flush.store(true, Ordering::SeqCst);
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(1));

        let ticket = pipeline.request("u1", codes([1]));
        assert!(matches!(
            ticket.outcome().await,
            Some(DeletionOutcome::FlushFailed { verified: 1, .. })
        ));

        store.fail_flush.store(false, Ordering::SeqCst);
        let ticket = pipeline.request("u1", codes([2]));
        assert_eq!(
            ticket.outcome().await,
            Some(DeletionOutcome::Purged { verified: 1 })
        );

        // the failed batch is not retried
        assert_eq!(store.flushes(), vec![vec![2]]);
        assert!(!store.is_deleted(1));
    }

    #[tokio::test]
    async fn request_spanning_a_failed_batch_reports_failure() {
        let store = Arc::new(FakeStore::default().with_owner("u1", 1..=11));
        store.failing_flushes.store(1, Ordering::SeqCst);
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(10));

        let ticket = pipeline.request("u1", codes(1..=11));
        pipeline.shutdown().await;

        assert!(matches!(
            ticket.outcome().await,
            Some(DeletionOutcome::FlushFailed { verified: 11, .. })
        ));
        assert_eq!(store.flushes(), vec![vec![11]]);
        assert!(!store.is_deleted(1));
        assert!(store.is_deleted(11));
    }

    #[tokio::test]
    async fn requests_sharing_a_batch_complete_together() {
        let store = Arc::new(
            FakeStore::default()
                .with_owner("u1", [1, 2])
                .with_owner("u2", [3]),
        );
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(10));

        let first = pipeline.request("u1", codes([1, 2]));
        let second = pipeline.request("u2", codes([3]));
        pipeline.shutdown().await;

        assert_eq!(
            first.outcome().await,
            Some(DeletionOutcome::Purged { verified: 2 })
        );
        assert_eq!(
            second.outcome().await,
            Some(DeletionOutcome::Purged { verified: 1 })
        );
        assert_eq!(store.flushes().len(), 1);
    }

    #[tokio::test]
    async fn failed_verification_is_reported() {
        let store = Arc::new(FakeStore::default().with_owner("u1", [1]));
        store.fail_verify.store(true, Ordering::SeqCst);
        let pipeline = DeletionPipeline::start(store.clone(), slow_timer(1));

        let ticket = pipeline.request("u1", codes([1]));

        assert!(matches!(
            ticket.outcome().await,
            Some(DeletionOutcome::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn small_queue_applies_backpressure_without_loss() {
        let store = Arc::new(FakeStore::default().with_owner("u1", 1..=25));
        let config = PurgeConfig::builder()
            .batch_capacity(4)
            .queue_capacity(1)
            .flush_interval(Duration::from_secs(3600))
            .build();
        let pipeline = DeletionPipeline::start(store.clone(), config);

        let ticket = pipeline.request("u1", codes(1..=25));
        pipeline.shutdown().await;

        assert_eq!(
            ticket.outcome().await,
            Some(DeletionOutcome::Purged { verified: 25 })
        );
        assert!((1..=25).all(|id| store.is_deleted(id)));
        let sizes: Vec<_> = store.flushes().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 4, 4, 4, 4, 1]);
    }
}
