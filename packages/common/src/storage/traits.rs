use std::sync::Arc;

use async_trait::async_trait;

use super::error::StoreError;
use crate::judge_result::SubmissionOutcome;
use crate::problem::Problem;
use crate::submission::{NewSubmission, Submission};
use crate::SubmissionStatus;

/// Read-only problem lookup.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, id: i64) -> Result<Option<Arc<Problem>>, StoreError>;
}

/// User existence lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, id: i64) -> Result<bool, StoreError>;
}

/// Outcome of a terminal write.
#[derive(Debug, Clone)]
pub enum FinalizeResult {
    /// This call performed the transition; the record is returned as stored.
    Finalized(Submission),
    /// The submission was already final; nothing changed.
    AlreadyFinal(Submission),
}

impl FinalizeResult {
    pub fn submission(&self) -> &Submission {
        match self {
            Self::Finalized(s) | Self::AlreadyFinal(s) => s,
        }
    }
}

/// Submission persistence.
///
/// Implementations must make `mark_running` and `finalize` atomic
/// compare-and-set operations on the status column, so a terminal state can
/// be written exactly once.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new submission in `queued` state and assign its id.
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError>;

    /// Move `queued` to `running`. Returns false if the submission is not queued.
    async fn mark_running(&self, id: i64) -> Result<bool, StoreError>;

    /// Write the terminal outcome if the submission is not final yet.
    async fn finalize(
        &self,
        id: i64,
        outcome: SubmissionOutcome,
    ) -> Result<FinalizeResult, StoreError>;

    /// Ids of non-final submissions by `user_id` for `problem_id`, oldest first.
    async fn find_active(&self, user_id: i64, problem_id: i64) -> Result<Vec<i64>, StoreError>;

    /// Current status, if the submission exists.
    async fn status(&self, id: i64) -> Result<Option<SubmissionStatus>, StoreError> {
        Ok(self.get(id).await?.map(|s| s.status))
    }
}
