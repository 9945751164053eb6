use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::SubmissionEvent;
use crate::storage::{StoreError, SubmissionStore};
use crate::submission::Submission;

/// Pushes terminal verdicts back to interested clients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, submission: &Submission);
}

/// Fan-out of terminal events over a tokio broadcast channel.
///
/// Delivery is best-effort. A client that misses an event re-reads the
/// submission from the store.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SubmissionEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.tx.subscribe()
    }

    /// Wait until `submission_id` is terminal and return its final record.
    ///
    /// Subscribes before reading the store, so an event published between the
    /// read and the subscription cannot be lost. Returns `Ok(None)` if the
    /// submission does not exist.
    pub async fn wait_terminal(
        &self,
        store: &dyn SubmissionStore,
        submission_id: i64,
    ) -> Result<Option<Submission>, StoreError> {
        let mut rx = self.subscribe();

        match store.get(submission_id).await? {
            None => return Ok(None),
            Some(s) if s.is_final() => return Ok(Some(s)),
            Some(_) => {}
        }

        loop {
            match rx.recv().await {
                Ok(event) if event.submission_id == submission_id => {
                    return store.get(submission_id).await;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(submission_id, skipped, "Notifier lagged, re-reading store");
                    if let Some(s) = store.get(submission_id).await? {
                        if s.is_final() {
                            return Ok(Some(s));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return store.get(submission_id).await;
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, submission: &Submission) {
        if !submission.is_final() {
            warn!(
                submission_id = submission.id,
                status = %submission.status,
                "Refusing to publish non-terminal submission"
            );
            return;
        }
        // No receivers is not an error: nobody is waiting on this submission.
        let receivers = self.tx.send(SubmissionEvent::from(submission)).unwrap_or(0);
        debug!(submission_id = submission.id, receivers, "Published verdict");
    }
}
