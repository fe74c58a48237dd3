//! Completion reporting for asynchronous deletion requests.
//!
//! [`Repository::request_deletion`](crate::Repository::request_deletion) returns
//! immediately with a [`DeletionTicket`]. The deletion proceeds whether or not
//! the ticket is awaited or dropped; awaiting it is only for callers that want
//! confirmation.

use tokio::sync::oneshot;

/// How a deletion request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Every batch holding the request's links was written. `verified` links
    /// owned by the requester are now soft-deleted.
    Purged { verified: usize },
    /// None of the requested codes named an active link owned by the requester.
    NothingToDelete,
    /// At least one flush carrying links of this request failed. Links in
    /// that batch were dropped; links in other batches may be deleted.
    FlushFailed { verified: usize, reason: String },
    /// Ownership could not be checked, nothing was queued.
    VerificationFailed(String),
    /// The backend was closed before the request arrived.
    Rejected,
    /// The backend does not support deletion.
    Unsupported,
}

/// Receiving half of a deletion completion notification.
#[derive(Debug)]
pub struct DeletionTicket {
    rx: oneshot::Receiver<DeletionOutcome>,
}

/// Sending half of a deletion completion notification.
#[derive(Debug)]
pub struct DeletionNotifier {
    tx: oneshot::Sender<DeletionOutcome>,
}

impl DeletionTicket {
    /// Creates a connected notifier/ticket pair.
    pub fn channel() -> (DeletionNotifier, DeletionTicket) {
        let (tx, rx) = oneshot::channel();
        (DeletionNotifier { tx }, DeletionTicket { rx })
    }

    /// Creates a ticket that is already resolved.
    pub fn resolved(outcome: DeletionOutcome) -> Self {
        let (notifier, ticket) = Self::channel();
        notifier.notify(outcome);
        ticket
    }

    /// Waits for the request to finish.
    ///
    /// Returns `None` if the pipeline went away without reporting, e.g. the
    /// runtime shut down while the request was in flight.
    pub async fn outcome(self) -> Option<DeletionOutcome> {
        self.rx.await.ok()
    }
}

impl DeletionNotifier {
    /// Reports the outcome. A dropped ticket is not an error.
    pub fn notify(self, outcome: DeletionOutcome) {
        let _ = self.tx.send(outcome);
    }
}
