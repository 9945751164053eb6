use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StoreError;
use serde::Serialize;

use crate::intake::IntakeError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `NOT_FOUND`,
    /// `UNSUPPORTED_LANGUAGE`, `CAPACITY_EXCEEDED`, `CONFLICT`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "Code must not be empty")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    UnsupportedLanguage(String),
    /// The judge queue is full. Contains seconds until a retry is sensible.
    CapacityExceeded {
        message: String,
        retry_after: u64,
    },
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::UnsupportedLanguage(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "UNSUPPORTED_LANGUAGE",
                    message: msg,
                },
            ),
            AppError::CapacityExceeded { message, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "CAPACITY_EXCEEDED",
                    message,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = if let AppError::CapacityExceeded { retry_after, .. } = &self {
            Some(*retry_after)
        } else {
            None
        };

        let (status, body) = self.status_and_body();

        if let Some(seconds) = retry_after {
            (status, [("Retry-After", seconds.to_string())], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::UnsupportedLanguage(e) => AppError::UnsupportedLanguage(e.to_string()),
            IntakeError::Validation(msg) => AppError::Validation(msg),
            e @ (IntakeError::UserNotFound(_)
            | IntakeError::ProblemNotFound(_)
            | IntakeError::SubmissionNotFound(_)) => AppError::NotFound(e.to_string()),
            e @ IntakeError::CapacityExceeded { .. } => AppError::CapacityExceeded {
                message: e.to_string(),
                retry_after: 1,
            },
            e @ IntakeError::QueueClosed => AppError::CapacityExceeded {
                message: e.to_string(),
                retry_after: 5,
            },
            e @ IntakeError::AlreadyFinal { .. } => AppError::Conflict(e.to_string()),
            IntakeError::Store(e) => e.into(),
        }
    }
}
