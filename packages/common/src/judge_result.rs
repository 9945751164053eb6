use crate::retry::RetryAttempt;
use crate::{SubmissionStatus, Verdict};
use serde::{Deserialize, Serialize};

/// Machine-readable error codes stored on submissions that end in `error`.
pub struct JudgeErrorCode;

impl JudgeErrorCode {
    /// The sandbox could not be prepared or failed mid-run after all retries.
    pub const SANDBOX_FAILURE: &'static str = "SANDBOX_FAILURE";
    /// The problem referenced by the submission vanished before judging.
    pub const PROBLEM_MISSING: &'static str = "PROBLEM_MISSING";
    /// A worker task panicked while owning the job.
    pub const WORKER_PANIC: &'static str = "WORKER_PANIC";
    /// The collected test results did not cover every test case exactly once.
    pub const INCOMPLETE_RESULTS: &'static str = "INCOMPLETE_RESULTS";
    /// Reading or writing the submission store failed mid-job.
    pub const STORE_FAILURE: &'static str = "STORE_FAILURE";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeErrorInfo {
    /// One of the [`JudgeErrorCode`] constants.
    pub code: String,
    /// Human-readable error description.
    pub message: String,
    /// Failed attempts leading to this error, oldest first.
    #[serde(default)]
    pub attempts: Vec<RetryAttempt>,
}

impl JudgeErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<RetryAttempt>) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Result for a single test case execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestCaseResult {
    /// Zero-based position of the test case in the problem.
    pub index: usize,
    pub verdict: Verdict,
    pub passed: bool,
    /// Captured stdout, truncated to the configured output limit.
    pub actual_output: String,
    pub stderr: Option<String>,
    /// CPU time used in milliseconds.
    pub time_used: u64,
    /// Peak memory in kilobytes.
    pub memory_used: u64,
}

impl TestCaseResult {
    /// Placeholder for a test that never ran.
    pub fn skipped(index: usize) -> Self {
        Self {
            index,
            verdict: Verdict::Skipped,
            passed: false,
            actual_output: String::new(),
            stderr: None,
            time_used: 0,
            memory_used: 0,
        }
    }
}

/// Everything the aggregator writes in the single terminal transition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub score: i32,
    /// Sum of per-test CPU time in milliseconds.
    pub time_used: u64,
    /// Maximum per-test memory in kilobytes.
    pub memory_used: u64,
    pub test_results: Vec<TestCaseResult>,
    pub compile_output: Option<String>,
    pub error_info: Option<JudgeErrorInfo>,
}

impl SubmissionOutcome {
    pub fn system_error(error_info: JudgeErrorInfo) -> Self {
        Self {
            status: SubmissionStatus::Error,
            score: 0,
            time_used: 0,
            memory_used: 0,
            test_results: vec![],
            compile_output: None,
            error_info: Some(error_info),
        }
    }

    pub fn compile_error(output: String) -> Self {
        Self {
            status: SubmissionStatus::CompileError,
            score: 0,
            time_used: 0,
            memory_used: 0,
            test_results: vec![],
            compile_output: Some(output),
            error_info: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: SubmissionStatus::Cancelled,
            score: 0,
            time_used: 0,
            memory_used: 0,
            test_results: vec![],
            compile_output: None,
            error_info: None,
        }
    }
}
