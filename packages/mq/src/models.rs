use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::QueueError;

type Registry = Arc<DashMap<i64, (String, CancellationToken)>>;

/// A unit of judging work. Lives from enqueue until the worker that owns it
/// drops it after the terminal write.
#[derive(Debug)]
pub struct Job {
    pub job_id: String,
    pub submission_id: i64,
    pub enqueued_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    _registration: Registration,
}

impl Job {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Keeps the job reachable by `JobQueue::cancel` until the job is dropped.
#[derive(Debug)]
struct Registration {
    registry: Registry,
    submission_id: i64,
    job_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.submission_id, |_, (job_id, _)| *job_id == self.job_id);
    }
}

/// Create a bounded FIFO queue.
pub fn bounded(config: QueueConfig) -> (JobQueue, JobReceiver) {
    let capacity = config.capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let queue = JobQueue {
        tx,
        registry: Arc::new(DashMap::new()),
        capacity,
        enqueue_timeout: config.enqueue_timeout,
    };
    (queue, JobReceiver { rx })
}

/// Producer side of the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    registry: Registry,
    capacity: usize,
    enqueue_timeout: std::time::Duration,
}

impl JobQueue {
    /// Reserve a slot, waiting at most the configured enqueue timeout.
    ///
    /// Holding a [`JobSlot`] guarantees the later `send` succeeds, which lets
    /// callers create the submission record only once capacity is known.
    pub async fn reserve(&self) -> Result<JobSlot, QueueError> {
        let permit = if self.enqueue_timeout.is_zero() {
            self.tx
                .clone()
                .try_reserve_owned()
                .map_err(|e| match e {
                    TrySendError::Full(_) => QueueError::CapacityExceeded {
                        capacity: self.capacity,
                    },
                    TrySendError::Closed(_) => QueueError::Closed,
                })?
        } else {
            match tokio::time::timeout(self.enqueue_timeout, self.tx.clone().reserve_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(QueueError::Closed),
                Err(_) => {
                    return Err(QueueError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
            }
        };

        Ok(JobSlot {
            permit,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Reserve and send in one step.
    pub async fn enqueue(&self, submission_id: i64) -> Result<String, QueueError> {
        Ok(self.reserve().await?.send(submission_id))
    }

    /// Signal cancellation to the job of `submission_id`, queued or running.
    /// Returns false if no such job is in the pipeline.
    pub fn cancel(&self, submission_id: i64) -> bool {
        match self.registry.get(&submission_id) {
            Some(entry) => {
                let (job_id, token) = entry.value();
                debug!(submission_id, job_id = %job_id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Jobs waiting for a worker, including reserved slots.
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A reserved queue slot. Dropping it without sending frees the slot.
pub struct JobSlot {
    permit: OwnedPermit<Job>,
    registry: Registry,
}

impl JobSlot {
    /// Enqueue the job for `submission_id` and return its job id.
    pub fn send(self, submission_id: i64) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.registry
            .insert(submission_id, (job_id.clone(), cancel.clone()));

        let job = Job {
            job_id: job_id.clone(),
            submission_id,
            enqueued_at: Utc::now(),
            cancel,
            _registration: Registration {
                registry: self.registry,
                submission_id,
                job_id: job_id.clone(),
            },
        };
        self.permit.send(job);
        job_id
    }
}

/// Consumer side of the job queue. Exactly one dispatcher owns it.
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

impl JobReceiver {
    /// Next job in FIFO order. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Stop accepting new jobs. Already queued jobs can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue(capacity: usize, timeout_ms: u64) -> (JobQueue, JobReceiver) {
        bounded(QueueConfig::new(capacity, Duration::from_millis(timeout_ms)))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (q, mut rx) = queue(8, 0);
        for id in 1..=5 {
            q.enqueue(id).await.unwrap();
        }
        assert_eq!(q.len(), 5);

        let mut got = Vec::new();
        for _ in 0..5 {
            got.push(rx.recv().await.unwrap().submission_id);
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_immediately() {
        let (q, _rx) = queue(2, 0);
        q.enqueue(1).await.unwrap();
        q.enqueue(2).await.unwrap();
        assert!(q.is_full());
        assert_eq!(
            q.enqueue(3).await,
            Err(QueueError::CapacityExceeded { capacity: 2 })
        );
    }

    #[tokio::test]
    async fn test_full_queue_rejects_after_timeout() {
        let (q, _rx) = queue(1, 50);
        q.enqueue(1).await.unwrap();

        let started = std::time::Instant::now();
        let err = q.enqueue(2).await.unwrap_err();
        assert!(matches!(err, QueueError::CapacityExceeded { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiting_producer_gets_freed_slot() {
        let (q, mut rx) = queue(1, 2000);
        q.enqueue(1).await.unwrap();

        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.recv().await.unwrap().submission_id, 1);

        producer.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().submission_id, 2);
    }

    #[tokio::test]
    async fn test_dropped_slot_frees_capacity() {
        let (q, _rx) = queue(1, 0);
        let slot = q.reserve().await.unwrap();
        assert!(q.reserve().await.is_err());
        drop(slot);
        assert!(q.reserve().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_reaches_queued_job_until_dropped() {
        let (q, mut rx) = queue(4, 0);
        q.enqueue(7).await.unwrap();

        assert!(q.cancel(7));
        assert!(!q.cancel(8));

        let job = rx.recv().await.unwrap();
        assert!(job.is_cancelled());
        drop(job);
        assert!(!q.cancel(7));
    }

    #[tokio::test]
    async fn test_closed_receiver_drains_then_rejects() {
        let (q, mut rx) = queue(4, 0);
        q.enqueue(1).await.unwrap();
        rx.close();

        assert_eq!(q.enqueue(2).await, Err(QueueError::Closed));
        assert_eq!(rx.recv().await.unwrap().submission_id, 1);
        assert!(rx.recv().await.is_none());
    }
}
