use chrono::{DateTime, Utc};
use common::judge_result::TestCaseResult;
use common::submission::Submission;
use common::{Language, SubmissionStatus, Verdict};
use serde::{Deserialize, Serialize};

/// Request body for creating a submission.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct CreateSubmissionRequest {
    #[schema(example = 1)]
    pub user_id: i64,
    #[schema(example = 1)]
    pub problem_id: i64,
    /// Complete source code of the solution.
    #[schema(example = "a, b = map(int, input().split())\nprint(a + b)")]
    pub code: String,
    /// One of `c`, `cpp`, `java`, `python`, `javascript`.
    #[schema(example = "python")]
    pub language: String,
}

/// Returned as soon as the submission is queued.
#[derive(Serialize, utoipa::ToSchema)]
pub struct CreateSubmissionResponse {
    #[schema(example = 1)]
    pub submission_id: i64,
    /// Always `queued`.
    pub status: SubmissionStatus,
}

/// Result of a single test case.
#[derive(Serialize, utoipa::ToSchema)]
pub struct TestCaseResultResponse {
    /// Zero-based test case index.
    #[schema(example = 0)]
    pub index: usize,
    pub verdict: Verdict,
    pub passed: bool,
    pub actual_output: String,
    /// Start of the program's stderr, if any.
    pub stderr: Option<String>,
    /// CPU time in milliseconds.
    #[schema(example = 12)]
    pub time_used: u64,
    /// Peak memory in kilobytes.
    #[schema(example = 8192)]
    pub memory_used: u64,
}

impl From<TestCaseResult> for TestCaseResultResponse {
    fn from(r: TestCaseResult) -> Self {
        Self {
            index: r.index,
            verdict: r.verdict,
            passed: r.passed,
            actual_output: r.actual_output,
            stderr: r.stderr,
            time_used: r.time_used,
            memory_used: r.memory_used,
        }
    }
}

/// Infrastructure failure details for submissions in `error`.
#[derive(Serialize, utoipa::ToSchema)]
pub struct JudgeErrorResponse {
    #[schema(example = "SANDBOX_FAILURE")]
    pub code: String,
    pub message: String,
    /// Number of judging attempts that failed.
    #[schema(example = 2)]
    pub attempts: usize,
}

/// Full submission state.
#[derive(Serialize, utoipa::ToSchema)]
pub struct SubmissionResponse {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = 1)]
    pub user_id: i64,
    #[schema(example = 1)]
    pub problem_id: i64,
    pub language: Language,
    pub status: SubmissionStatus,
    /// Points awarded. Zero until judged.
    #[schema(example = 100)]
    pub score: i32,
    /// Total CPU time across test cases, in milliseconds.
    #[schema(example = 35)]
    pub time_used: u64,
    /// Peak memory across test cases, in kilobytes.
    #[schema(example = 9216)]
    pub memory_used: u64,
    /// One entry per test case, in test order. Empty until judged.
    pub test_results: Vec<TestCaseResultResponse>,
    /// Compiler diagnostics when the status is `compile_error`.
    pub compile_output: Option<String>,
    pub error: Option<JudgeErrorResponse>,
    #[schema(example = "2025-10-01T14:30:00Z")]
    pub created_at: DateTime<Utc>,
    /// Set once the submission reached a terminal status.
    pub judged_at: Option<DateTime<Utc>>,
}

impl From<Submission> for SubmissionResponse {
    fn from(s: Submission) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            problem_id: s.problem_id,
            language: s.language,
            status: s.status,
            score: s.score,
            time_used: s.time_used,
            memory_used: s.memory_used,
            test_results: s.test_results.into_iter().map(Into::into).collect(),
            compile_output: s.compile_output,
            error: s.error_info.map(|e| JudgeErrorResponse {
                code: e.code,
                message: e.message,
                attempts: e.attempts.len(),
            }),
            created_at: s.created_at,
            judged_at: s.judged_at,
        }
    }
}

/// Response to a cancellation request.
#[derive(Serialize, utoipa::ToSchema)]
pub struct CancelSubmissionResponse {
    #[schema(example = 1)]
    pub submission_id: i64,
    /// `cancelling` if a worker still owns the job, `cancelled` otherwise.
    #[schema(example = "cancelling")]
    pub state: &'static str,
}
