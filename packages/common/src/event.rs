use serde::{Deserialize, Serialize};

use crate::SubmissionStatus;
use crate::submission::Submission;

/// Published once per submission, when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub submission_id: i64,
    pub status: SubmissionStatus,
    pub score: i32,
    pub time_used: u64,
    pub memory_used: u64,
}

impl SubmissionEvent {
    /// Topic name used when the event is forwarded to external channels.
    pub const TOPIC: &'static str = "submission_judged";
}

impl From<&Submission> for SubmissionEvent {
    fn from(s: &Submission) -> Self {
        Self {
            submission_id: s.id,
            status: s.status,
            score: s.score,
            time_used: s.time_used,
            memory_used: s.memory_used,
        }
    }
}
