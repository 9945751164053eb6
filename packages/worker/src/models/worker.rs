//! Fixed-size pool of judging slots fed by a single FIFO dispatcher.

use std::sync::{Arc, Mutex as StdMutex};

use common::judge_result::{JudgeErrorCode, JudgeErrorInfo, SubmissionOutcome};
use common::notify::Notifier;
use common::retry::RetryTracker;
use common::storage::{ProblemStore, SubmissionStore};
use mq::{Job, JobReceiver};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::error::JudgeError;
use crate::handlers::judge::handle_judge_job;
use crate::models::aggregator::commit;
use crate::models::sandbox::Sandbox;

/// Shared dependencies of every job.
#[derive(Clone)]
pub struct WorkerContext {
    pub submissions: Arc<dyn SubmissionStore>,
    pub problems: Arc<dyn ProblemStore>,
    pub notifier: Arc<dyn Notifier>,
    pub sandbox: Arc<dyn Sandbox>,
    pub settings: Arc<WorkerSettings>,
    pub retry_tracker: Arc<Mutex<RetryTracker>>,
}

impl WorkerContext {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        problems: Arc<dyn ProblemStore>,
        notifier: Arc<dyn Notifier>,
        sandbox: Arc<dyn Sandbox>,
        settings: WorkerSettings,
    ) -> Self {
        let retry_tracker = Arc::new(Mutex::new(RetryTracker::new(
            settings.judge.sandbox_retries,
        )));
        Self {
            submissions,
            problems,
            notifier,
            sandbox,
            settings: Arc::new(settings),
            retry_tracker,
        }
    }

    async fn finalize_failed(&self, submission_id: i64, info: JudgeErrorInfo) {
        let outcome = SubmissionOutcome::system_error(info);
        if let Err(e) = commit(
            self.submissions.as_ref(),
            self.notifier.as_ref(),
            submission_id,
            outcome,
        )
        .await
        {
            error!(submission_id, error = %e, "Failed to record job failure");
        }
    }
}

/// A worker slot: a concurrency permit plus the box id it owns.
/// Dropping the slot returns both.
struct WorkerSlot {
    box_id: u32,
    box_ids: Arc<StdMutex<Vec<u32>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.box_ids.lock() {
            ids.push(self.box_id);
        }
    }
}

#[derive(Clone)]
struct SlotPool {
    permits: Arc<Semaphore>,
    box_ids: Arc<StdMutex<Vec<u32>>>,
}

impl SlotPool {
    fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            box_ids: Arc::new(StdMutex::new((0..size as u32).rev().collect())),
        }
    }

    async fn acquire(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        // A permit guarantees a free box id.
        let box_id = self.box_ids.lock().ok()?.pop()?;
        Some(WorkerSlot {
            box_id,
            box_ids: Arc::clone(&self.box_ids),
            _permit: permit,
        })
    }
}

/// Handle to the running pool.
pub struct WorkerPool {
    size: usize,
    slots: SlotPool,
    stop: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the dispatcher. Jobs are taken from `receiver` in FIFO order and
    /// each is handed to exactly one slot.
    pub fn start(ctx: WorkerContext, receiver: JobReceiver) -> Self {
        let size = ctx.settings.judge.workers.max(1);
        let slots = SlotPool::new(size);
        let stop = CancellationToken::new();

        info!(
            workers = size,
            sandbox = ctx.sandbox.name(),
            fail_fast = ctx.settings.judge.fail_fast,
            "Worker pool starting"
        );

        let dispatcher = tokio::spawn(dispatch(ctx, receiver, slots.clone(), stop.clone()));
        Self {
            size,
            slots,
            stop,
            dispatcher,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop taking jobs and wait for in-flight ones. Jobs still queued are
    /// finalized as cancelled.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }
        match self.slots.permits.acquire_many(self.size as u32).await {
            Ok(_) => info!("Worker pool stopped"),
            Err(e) => warn!(error = %e, "Worker pool semaphore closed during shutdown"),
        }
    }
}

async fn dispatch(
    ctx: WorkerContext,
    mut receiver: JobReceiver,
    slots: SlotPool,
    stop: CancellationToken,
) {
    let mut draining = false;
    loop {
        if draining {
            // A closed receiver still yields what was queued, then `None`.
            match receiver.recv().await {
                Some(job) => cancel_queued(&ctx, job).await,
                None => break,
            }
            continue;
        }

        // A job leaves the queue only once a slot is free, so the queue bound
        // covers every job not yet running.
        let slot = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Closing job queue");
                receiver.close();
                draining = true;
                continue;
            }
            slot = slots.acquire() => slot,
        };
        let Some(slot) = slot else {
            error!("Worker slots closed, closing job queue");
            receiver.close();
            draining = true;
            continue;
        };

        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Closing job queue");
                receiver.close();
                draining = true;
                continue;
            }
            job = receiver.recv() => job,
        };
        let Some(job) = next else { break };

        if job.is_cancelled() {
            drop(slot);
            cancel_queued(&ctx, job).await;
            continue;
        }
        debug!(
            submission_id = job.submission_id,
            job_id = %job.job_id,
            box_id = slot.box_id,
            "Dispatching job"
        );
        spawn_job(ctx.clone(), job, slot);
    }
    debug!("Dispatcher stopped");
}

async fn cancel_queued(ctx: &WorkerContext, job: Job) {
    if let Err(e) = commit(
        ctx.submissions.as_ref(),
        ctx.notifier.as_ref(),
        job.submission_id,
        SubmissionOutcome::cancelled(),
    )
    .await
    {
        error!(submission_id = job.submission_id, error = %e, "Failed to cancel queued job");
    }
}

/// Run the job in its own task and watch it from an outer task, so a panic
/// still finalizes the submission and releases the slot.
fn spawn_job(ctx: WorkerContext, job: Job, slot: WorkerSlot) {
    tokio::spawn(async move {
        let submission_id = job.submission_id;
        let job_id = job.job_id.clone();
        let box_id = slot.box_id;

        let inner_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let result = handle_judge_job(&inner_ctx, &job, box_id).await;
            drop(job);
            result
        });

        let failure = match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(JudgeError::SubmissionMissing(id))) => {
                error!(submission_id = id, job_id = %job_id, "Submission not found, dropping job");
                None
            }
            Ok(Err(e)) => {
                error!(submission_id, job_id = %job_id, error = %e, "Job failed");
                let code = match e {
                    JudgeError::Sandbox(_) => JudgeErrorCode::SANDBOX_FAILURE,
                    _ => JudgeErrorCode::STORE_FAILURE,
                };
                Some(JudgeErrorInfo::new(code, e.to_string()))
            }
            Err(join_err) => {
                error!(submission_id, job_id = %job_id, error = %join_err, "Job task panicked");
                Some(JudgeErrorInfo::new(
                    JudgeErrorCode::WORKER_PANIC,
                    format!("worker task failed: {join_err}"),
                ))
            }
        };

        if let Some(info) = failure {
            ctx.finalize_failed(submission_id, info).await;
        }
        drop(slot);
    });
}
