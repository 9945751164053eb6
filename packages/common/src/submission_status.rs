use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission during the judging lifecycle.
///
/// `Queued` and `Running` are the only non-terminal states. Once a submission
/// reaches any other status it never changes again.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Waiting in the job queue.
    #[default]
    Queued,
    /// Owned by a worker, compiling or running test cases.
    Running,
    /// All test cases passed.
    Accepted,
    /// Output did not match expected output.
    WrongAnswer,
    /// Program crashed or exited with non-zero code.
    RuntimeError,
    /// Failed to compile.
    CompileError,
    /// Exceeded time limit.
    Timeout,
    /// Exceeded memory limit.
    MemoryExceeded,
    /// The sandbox infrastructure failed and retries were exhausted.
    Error,
    /// Explicitly cancelled or superseded.
    Cancelled,
}

impl SubmissionStatus {
    /// Returns true if this is a final status (judging is complete).
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Returns true if this is a successful verdict.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// All possible status values.
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Queued,
        Self::Running,
        Self::Accepted,
        Self::WrongAnswer,
        Self::RuntimeError,
        Self::CompileError,
        Self::Timeout,
        Self::MemoryExceeded,
        Self::Error,
        Self::Cancelled,
    ];

    /// Returns the string representation (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError => "runtime_error",
            Self::CompileError => "compile_error",
            Self::Timeout => "timeout",
            Self::MemoryExceeded => "memory_exceeded",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}

/// Verdict for a single test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    RuntimeError,
    Timeout,
    MemoryExceeded,
    /// Not executed because an earlier test failed under the fail-fast policy.
    Skipped,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Submission status this verdict is promoted to when it is the first failure.
    pub fn as_status(&self) -> SubmissionStatus {
        match self {
            Self::Accepted => SubmissionStatus::Accepted,
            Self::WrongAnswer => SubmissionStatus::WrongAnswer,
            Self::RuntimeError => SubmissionStatus::RuntimeError,
            Self::Timeout => SubmissionStatus::Timeout,
            Self::MemoryExceeded => SubmissionStatus::MemoryExceeded,
            // A skipped test is never the first failure; the test that caused the
            // skip precedes it.
            Self::Skipped => SubmissionStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&SubmissionStatus::WrongAnswer).unwrap();
        assert_eq!(json, "\"wrong_answer\"");
        let parsed: SubmissionStatus = serde_json::from_str("\"memory_exceeded\"").unwrap();
        assert_eq!(parsed, SubmissionStatus::MemoryExceeded);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "accepted".parse::<SubmissionStatus>().unwrap(),
            SubmissionStatus::Accepted
        );
        let err = "Accepted".parse::<SubmissionStatus>().unwrap_err();
        assert!(err.to_string().contains("compile_error"));
    }

    #[test]
    fn test_only_queued_and_running_are_not_final() {
        let open: Vec<_> = SubmissionStatus::ALL
            .iter()
            .filter(|s| !s.is_final())
            .collect();
        assert_eq!(
            open,
            vec![&SubmissionStatus::Queued, &SubmissionStatus::Running]
        );
    }

    #[test]
    fn test_verdict_promotion() {
        assert_eq!(Verdict::Timeout.as_status(), SubmissionStatus::Timeout);
        assert_eq!(
            Verdict::MemoryExceeded.as_status(),
            SubmissionStatus::MemoryExceeded
        );
    }
}
