//! Submission intake: validation, queue admission and cancellation.

use std::sync::Arc;

use common::config::JudgeConfig;
use common::judge_result::SubmissionOutcome;
use common::language::UnsupportedLanguage;
use common::notify::Notifier;
use common::storage::{FinalizeResult, ProblemStore, StoreError, SubmissionStore, UserStore};
use common::submission::{NewSubmission, Submission};
use common::{Language, SubmissionStatus};
use mq::{JobQueue, QueueError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use worker::models::aggregator::commit;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("{0}")]
    Validation(String),

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Problem {0} not found")]
    ProblemNotFound(i64),

    #[error("Submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("Judge queue is full ({capacity} jobs)")]
    CapacityExceeded { capacity: usize },

    #[error("Judge queue is closed")]
    QueueClosed,

    #[error("Submission {id} is already {status}")]
    AlreadyFinal { id: i64, status: SubmissionStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QueueError> for IntakeError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::CapacityExceeded { capacity } => Self::CapacityExceeded { capacity },
            QueueError::Closed => Self::QueueClosed,
        }
    }
}

/// Returned by [`SubmissionIntake::submit`] as soon as the job is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub submission_id: i64,
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still in the pipeline; its worker finalizes it.
    Signalled,
    /// No job owned the submission, so it was finalized here.
    Cancelled,
}

pub struct SubmissionIntake {
    users: Arc<dyn UserStore>,
    problems: Arc<dyn ProblemStore>,
    submissions: Arc<dyn SubmissionStore>,
    notifier: Arc<dyn Notifier>,
    queue: JobQueue,
    max_source_bytes: usize,
    supersede_previous: bool,
}

impl SubmissionIntake {
    pub fn new(
        users: Arc<dyn UserStore>,
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
        notifier: Arc<dyn Notifier>,
        queue: JobQueue,
        judge: &JudgeConfig,
    ) -> Self {
        Self {
            users,
            problems,
            submissions,
            notifier,
            queue,
            max_source_bytes: judge.max_source_bytes,
            supersede_previous: judge.supersede_previous,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Validate and enqueue a submission. Returns without waiting for judging.
    ///
    /// The queue slot is reserved before the submission row exists, so a
    /// rejected request leaves nothing behind.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn submit(
        &self,
        user_id: i64,
        problem_id: i64,
        code: String,
        language: &str,
    ) -> Result<JobHandle, IntakeError> {
        let language: Language = language.parse()?;
        self.validate_code(&code)?;

        if !self.users.user_exists(user_id).await? {
            return Err(IntakeError::UserNotFound(user_id));
        }
        let problem = self
            .problems
            .get_problem(problem_id)
            .await?
            .ok_or(IntakeError::ProblemNotFound(problem_id))?;
        if problem.test_cases.is_empty() {
            return Err(IntakeError::Validation(format!(
                "Problem {problem_id} has no test cases"
            )));
        }

        let slot = self.queue.reserve().await.inspect_err(|e| {
            warn!(error = %e, queued = self.queue.len(), "Submission rejected");
        })?;

        let submission = self
            .submissions
            .create(NewSubmission {
                user_id,
                problem_id,
                code,
                language,
            })
            .await?;
        let job_id = slot.send(submission.id);
        info!(submission_id = submission.id, job_id = %job_id, %language, "Submission queued");

        // The new job is already queued; a supersede failure must not fail
        // the request that created it.
        if self.supersede_previous {
            self.supersede(user_id, problem_id, submission.id).await;
        }

        Ok(JobHandle {
            submission_id: submission.id,
            job_id,
        })
    }

    /// Poll read of the current submission state.
    pub async fn get(&self, submission_id: i64) -> Result<Submission, IntakeError> {
        self.submissions
            .get(submission_id)
            .await?
            .ok_or(IntakeError::SubmissionNotFound(submission_id))
    }

    /// Cancel a submission that has not reached a terminal state.
    #[instrument(skip(self))]
    pub async fn cancel(&self, submission_id: i64) -> Result<CancelOutcome, IntakeError> {
        let submission = self.get(submission_id).await?;
        if submission.is_final() {
            return Err(IntakeError::AlreadyFinal {
                id: submission_id,
                status: submission.status,
            });
        }

        if self.queue.cancel(submission_id) {
            info!("Cancellation signalled to job");
            return Ok(CancelOutcome::Signalled);
        }

        match commit(
            self.submissions.as_ref(),
            self.notifier.as_ref(),
            submission_id,
            SubmissionOutcome::cancelled(),
        )
        .await?
        {
            FinalizeResult::Finalized(_) => Ok(CancelOutcome::Cancelled),
            FinalizeResult::AlreadyFinal(s) => Err(IntakeError::AlreadyFinal {
                id: submission_id,
                status: s.status,
            }),
        }
    }

    fn validate_code(&self, code: &str) -> Result<(), IntakeError> {
        if code.trim().is_empty() {
            return Err(IntakeError::Validation("Code must not be empty".into()));
        }
        if code.len() > self.max_source_bytes {
            return Err(IntakeError::Validation(format!(
                "Code exceeds {} bytes",
                self.max_source_bytes
            )));
        }
        Ok(())
    }

    async fn supersede(&self, user_id: i64, problem_id: i64, keep: i64) {
        let older = match self.submissions.find_active(user_id, problem_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, keep, "Failed to look up superseded submissions");
                return;
            }
        };
        for id in older.into_iter().filter(|id| *id != keep) {
            match self.cancel(id).await {
                Ok(outcome) => debug!(submission_id = id, ?outcome, "Superseded submission"),
                // Finished between the lookup and the cancel.
                Err(IntakeError::AlreadyFinal { .. }) => {}
                Err(e) => warn!(submission_id = id, error = %e, "Failed to supersede submission"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::notify::BroadcastNotifier;
    use common::problem::{Difficulty, Problem, TestCase, User};
    use common::storage::MemoryStore;
    use mq::{JobReceiver, QueueConfig};
    use std::time::Duration;

    fn intake(capacity: usize, supersede: bool) -> (SubmissionIntake, JobReceiver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(User {
            id: 1,
            username: "alice".into(),
        });
        store.insert_problem(Problem {
            id: 1,
            title: "Sum".into(),
            description: String::new(),
            difficulty: Difficulty::Easy,
            time_limit_ms: 1000,
            memory_limit_mb: 64,
            test_cases: vec![TestCase::new("2 2", "4")],
        });
        store.insert_problem(Problem {
            id: 2,
            title: "Empty".into(),
            description: String::new(),
            difficulty: Difficulty::Easy,
            time_limit_ms: 1000,
            memory_limit_mb: 64,
            test_cases: vec![],
        });

        let judge = JudgeConfig {
            max_source_bytes: 32,
            supersede_previous: supersede,
            ..JudgeConfig::default()
        };
        let (queue, receiver) = mq::bounded(QueueConfig::new(capacity, Duration::ZERO));
        let intake = SubmissionIntake::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(BroadcastNotifier::new(8)),
            queue,
            &judge,
        );
        (intake, receiver, store)
    }

    #[tokio::test]
    async fn test_submit_queues_job() {
        let (intake, mut rx, store) = intake(4, false);
        let handle = intake.submit(1, 1, "print 4".into(), "python").await.unwrap();

        let s = intake.get(handle.submission_id).await.unwrap();
        assert_eq!(s.status, SubmissionStatus::Queued);
        assert_eq!(s.language, Language::Python);
        assert_eq!(store.submission_count(), 1);

        let job = rx.recv().await.unwrap();
        assert_eq!(job.submission_id, handle.submission_id);
        assert_eq!(job.job_id, handle.job_id);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (intake, _rx, store) = intake(4, false);

        let err = intake.submit(1, 1, "print 4".into(), "cobol").await.unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedLanguage(_)));

        let err = intake.submit(1, 1, "  \n\t".into(), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));

        let err = intake.submit(1, 1, "x".repeat(33), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));

        let err = intake.submit(7, 1, "print 4".into(), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::UserNotFound(7)));

        let err = intake.submit(1, 9, "print 4".into(), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::ProblemNotFound(9)));

        let err = intake.submit(1, 2, "print 4".into(), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));

        assert_eq!(store.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_orphan_row() {
        let (intake, _rx, store) = intake(2, false);
        intake.submit(1, 1, "print 4".into(), "python").await.unwrap();
        intake.submit(1, 1, "print 4".into(), "python").await.unwrap();

        let err = intake.submit(1, 1, "print 4".into(), "python").await.unwrap_err();
        assert!(matches!(err, IntakeError::CapacityExceeded { capacity: 2 }));
        assert_eq!(store.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_queued_signals_job() {
        let (intake, mut rx, _store) = intake(4, false);
        let handle = intake.submit(1, 1, "print 4".into(), "python").await.unwrap();

        let outcome = intake.cancel(handle.submission_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Signalled);
        assert!(rx.recv().await.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_without_job_finalizes_directly() {
        let (intake, mut rx, _store) = intake(4, false);
        let handle = intake.submit(1, 1, "print 4".into(), "python").await.unwrap();
        // Dropping the job unregisters it, as if its worker vanished.
        drop(rx.recv().await.unwrap());

        let outcome = intake.cancel(handle.submission_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        let s = intake.get(handle.submission_id).await.unwrap();
        assert_eq!(s.status, SubmissionStatus::Cancelled);

        let err = intake.cancel(handle.submission_id).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::AlreadyFinal {
                status: SubmissionStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_submission() {
        let (intake, _rx, _store) = intake(4, false);
        let err = intake.cancel(42).await.unwrap_err();
        assert!(matches!(err, IntakeError::SubmissionNotFound(42)));
    }

    /// Delegates to a `MemoryStore` but cannot list active submissions.
    struct NoLookupStore(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl SubmissionStore for NoLookupStore {
        async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
            self.0.create(new).await
        }

        async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
            self.0.get(id).await
        }

        async fn mark_running(&self, id: i64) -> Result<bool, StoreError> {
            self.0.mark_running(id).await
        }

        async fn finalize(
            &self,
            id: i64,
            outcome: SubmissionOutcome,
        ) -> Result<FinalizeResult, StoreError> {
            self.0.finalize(id, outcome).await
        }

        async fn find_active(&self, _: i64, _: i64) -> Result<Vec<i64>, StoreError> {
            Err(StoreError::Backend("index unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_supersede_lookup_failure_keeps_submission_accepted() {
        let (_seeded, _rx, store) = intake(4, true);
        let (queue, mut rx) = mq::bounded(QueueConfig::new(4, Duration::ZERO));
        let judge = JudgeConfig {
            supersede_previous: true,
            ..JudgeConfig::default()
        };
        let intake = SubmissionIntake::new(
            store.clone(),
            store.clone(),
            Arc::new(NoLookupStore(store.clone())),
            Arc::new(BroadcastNotifier::new(8)),
            queue,
            &judge,
        );

        let handle = intake.submit(1, 1, "print 4".into(), "python").await.unwrap();
        let job = rx.recv().await.unwrap();
        assert_eq!(job.submission_id, handle.submission_id);
        assert!(!job.is_cancelled());
        assert_eq!(store.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_supersede_cancels_older_submission() {
        let (intake, mut rx, _store) = intake(4, true);
        let first = intake.submit(1, 1, "print 4".into(), "python").await.unwrap();
        let second = intake.submit(1, 1, "print 5".into(), "python").await.unwrap();

        let job = rx.recv().await.unwrap();
        assert_eq!(job.submission_id, first.submission_id);
        assert!(job.is_cancelled());

        let job = rx.recv().await.unwrap();
        assert_eq!(job.submission_id, second.submission_id);
        assert!(!job.is_cancelled());
    }
}
