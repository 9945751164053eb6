use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::catalog::Catalog;
use super::error::StoreError;
use super::traits::{FinalizeResult, ProblemStore, SubmissionStore, UserStore};
use crate::SubmissionStatus;
use crate::judge_result::SubmissionOutcome;
use crate::problem::{Problem, User};
use crate::submission::{NewSubmission, Submission};

/// In-process store backed by concurrent hash maps.
///
/// Status transitions run while holding the shard lock of the entry, which
/// makes them atomic with respect to each other.
pub struct MemoryStore {
    problems: DashMap<i64, Arc<Problem>>,
    users: DashMap<i64, User>,
    submissions: DashMap<i64, Submission>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            problems: DashMap::new(),
            users: DashMap::new(),
            submissions: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        let store = Self::new();
        for user in catalog.users {
            store.insert_user(user);
        }
        for problem in catalog.problems {
            store.insert_problem(problem);
        }
        store
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_problem(&self, problem: Problem) {
        self.problems.insert(problem.id, Arc::new(problem));
    }

    pub fn remove_problem(&self, id: i64) {
        self.problems.remove(&id);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn get_problem(&self, id: i64) -> Result<Option<Arc<Problem>>, StoreError> {
        Ok(self.problems.get(&id).map(|p| Arc::clone(p.value())))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.users.contains_key(&id))
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let submission = Submission::new(id, new);
        self.submissions.insert(id, submission.clone());
        Ok(submission)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.get(&id).map(|s| s.value().clone()))
    }

    async fn mark_running(&self, id: i64) -> Result<bool, StoreError> {
        let mut entry = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;
        if entry.status != SubmissionStatus::Queued {
            return Ok(false);
        }
        entry.status = SubmissionStatus::Running;
        Ok(true)
    }

    async fn finalize(
        &self,
        id: i64,
        outcome: SubmissionOutcome,
    ) -> Result<FinalizeResult, StoreError> {
        let mut entry = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;
        if entry.is_final() {
            return Ok(FinalizeResult::AlreadyFinal(entry.clone()));
        }
        entry.apply_outcome(outcome);
        Ok(FinalizeResult::Finalized(entry.clone()))
    }

    async fn find_active(&self, user_id: i64, problem_id: i64) -> Result<Vec<i64>, StoreError> {
        let mut ids: Vec<i64> = self
            .submissions
            .iter()
            .filter(|s| s.user_id == user_id && s.problem_id == problem_id && !s.is_final())
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
