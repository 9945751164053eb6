use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::judge_result::{JudgeErrorInfo, SubmissionOutcome, TestCaseResult};
use crate::{Language, SubmissionStatus};

/// Fields supplied by intake when a submission row is created.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub user_id: i64,
    pub problem_id: i64,
    pub code: String,
    pub language: Language,
}

/// A persisted submission record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub code: String,
    pub language: Language,
    pub status: SubmissionStatus,
    pub score: i32,
    /// Total CPU time across test cases, in milliseconds.
    pub time_used: u64,
    /// Peak memory across test cases, in kilobytes.
    pub memory_used: u64,
    pub test_results: Vec<TestCaseResult>,
    pub compile_output: Option<String>,
    pub error_info: Option<JudgeErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub judged_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(id: i64, new: NewSubmission) -> Self {
        Self {
            id,
            user_id: new.user_id,
            problem_id: new.problem_id,
            code: new.code,
            language: new.language,
            status: SubmissionStatus::Queued,
            score: 0,
            time_used: 0,
            memory_used: 0,
            test_results: vec![],
            compile_output: None,
            error_info: None,
            created_at: Utc::now(),
            judged_at: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Apply a terminal outcome. Callers must have checked that the submission
    /// is not final yet.
    pub fn apply_outcome(&mut self, outcome: SubmissionOutcome) {
        self.status = outcome.status;
        self.score = outcome.score;
        self.time_used = outcome.time_used;
        self.memory_used = outcome.memory_used;
        self.test_results = outcome.test_results;
        self.compile_output = outcome.compile_output;
        self.error_info = outcome.error_info;
        self.judged_at = Some(Utc::now());
    }
}
