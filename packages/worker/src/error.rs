use common::storage::StoreError;
use thiserror::Error;

use crate::models::sandbox::error::SandboxError;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission {0} not found")]
    SubmissionMissing(i64),
}

pub type Result<T> = std::result::Result<T, JudgeError>;
