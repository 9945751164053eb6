pub mod config;
pub mod event;
pub mod judge_result;
pub mod language;
pub mod notify;
pub mod problem;
pub mod retry;
pub mod storage;
pub mod submission;
pub mod submission_status;

pub use language::Language;
pub use submission_status::{SubmissionStatus, Verdict};
