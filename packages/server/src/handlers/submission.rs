use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use common::SubmissionStatus;
use futures::Stream;
use tracing::{info, instrument, warn};

use crate::error::{AppError, ErrorBody};
use crate::extractors::json::AppJson;
use crate::intake::CancelOutcome;
use crate::models::submission::*;
use crate::state::AppState;

/// Submit a solution for judging.
#[utoipa::path(
    post,
    path = "/submissions",
    tag = "Submissions",
    operation_id = "createSubmission",
    summary = "Submit a solution to a problem",
    description = "Validates the submission and queues it for judging. Returns immediately; poll `GET /submissions/{id}` or subscribe to `/submissions/{id}/events` for the verdict.",
    request_body = CreateSubmissionRequest,
    responses(
        (status = 202, description = "Submission queued", body = CreateSubmissionResponse),
        (status = 400, description = "Invalid submission (VALIDATION_ERROR, UNSUPPORTED_LANGUAGE)", body = ErrorBody),
        (status = 404, description = "User or problem not found (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Judge queue full (CAPACITY_EXCEEDED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload), fields(user_id = payload.user_id, problem_id = payload.problem_id))]
pub async fn create_submission(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateSubmissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = state
        .intake
        .submit(
            payload.user_id,
            payload.problem_id,
            payload.code,
            &payload.language,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateSubmissionResponse {
            submission_id: handle.submission_id,
            status: SubmissionStatus::Queued,
        }),
    ))
}

/// Get the current state of a submission.
#[utoipa::path(
    get,
    path = "/submissions/{id}",
    tag = "Submissions",
    operation_id = "getSubmission",
    summary = "Get submission details",
    description = "Returns the submission with its per-test-case results. Results are empty until the submission is judged.",
    params(
        ("id" = i64, Path, description = "Submission ID")
    ),
    responses(
        (status = 200, description = "Submission details", body = SubmissionResponse),
        (status = 404, description = "Submission not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let submission = state.intake.get(id).await?;
    Ok(Json(submission.into()))
}

/// Cancel a queued or running submission.
#[utoipa::path(
    delete,
    path = "/submissions/{id}",
    tag = "Submissions",
    operation_id = "cancelSubmission",
    summary = "Cancel a submission",
    description = "Stops judging. A queued submission is never run; a running one has its sandboxed process killed. The submission ends in `cancelled`.",
    params(
        ("id" = i64, Path, description = "Submission ID")
    ),
    responses(
        (status = 202, description = "Cancellation accepted", body = CancelSubmissionResponse),
        (status = 404, description = "Submission not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Submission already judged (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn cancel_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.intake.cancel(id).await?;
    info!(?outcome, "Submission cancelled");

    let body = CancelSubmissionResponse {
        submission_id: id,
        state: match outcome {
            CancelOutcome::Signalled => "cancelling",
            CancelOutcome::Cancelled => "cancelled",
        },
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// Stream the terminal state of a submission.
#[utoipa::path(
    get,
    path = "/submissions/{id}/events",
    tag = "Submissions",
    operation_id = "submissionEvents",
    summary = "Wait for the verdict",
    description = "Server-sent events stream. Emits a single `verdict` event carrying the submission once it reaches a terminal status, then closes.",
    params(
        ("id" = i64, Path, description = "Submission ID")
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = SubmissionResponse),
        (status = 404, description = "Submission not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
pub async fn submission_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.intake.get(id).await?;

    let stream = futures::stream::once(async move {
        let event = match state
            .notifier
            .wait_terminal(state.submissions.as_ref(), id)
            .await
        {
            Ok(Some(submission)) => Event::default()
                .event("verdict")
                .json_data(SubmissionResponse::from(submission))
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Ok(None) => Event::default().event("error").data("submission not found"),
            Err(e) => {
                warn!(submission_id = id, error = %e, "Failed to wait for verdict");
                Event::default().event("error").data(e.to_string())
            }
        };
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
