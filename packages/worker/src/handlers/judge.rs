use common::judge_result::{JudgeErrorCode, JudgeErrorInfo, SubmissionOutcome};
use common::retry::{RetryCleanupGuard, RetryDecision, calculate_backoff};
use mq::Job;
use tracing::{error, info, instrument, warn};

use crate::error::{JudgeError, Result};
use crate::models::aggregator::{commit, outcome_from_report};
use crate::models::judge::judge_submission;
use crate::models::worker::WorkerContext;

/// Process one job from `queued` to a terminal state.
///
/// Sandbox failures retry the whole attempt with backoff. When retries are
/// exhausted the submission ends in `error` with the attempt history.
#[instrument(skip_all, fields(submission_id = job.submission_id, job_id = %job.job_id, box_id = box_id))]
pub async fn handle_judge_job(ctx: &WorkerContext, job: &Job, box_id: u32) -> Result<()> {
    let submission_id = job.submission_id;

    if job.is_cancelled() {
        commit(
            ctx.submissions.as_ref(),
            ctx.notifier.as_ref(),
            submission_id,
            SubmissionOutcome::cancelled(),
        )
        .await?;
        return Ok(());
    }

    let submission = ctx
        .submissions
        .get(submission_id)
        .await?
        .ok_or(JudgeError::SubmissionMissing(submission_id))?;

    if !ctx.submissions.mark_running(submission_id).await? {
        info!(status = %submission.status, "Submission already processed, skipping");
        return Ok(());
    }

    let Some(problem) = ctx.problems.get_problem(submission.problem_id).await? else {
        warn!(problem_id = submission.problem_id, "Problem vanished before judging");
        let info = JudgeErrorInfo::new(
            JudgeErrorCode::PROBLEM_MISSING,
            format!("problem {} not found", submission.problem_id),
        );
        commit(
            ctx.submissions.as_ref(),
            ctx.notifier.as_ref(),
            submission_id,
            SubmissionOutcome::system_error(info),
        )
        .await?;
        return Ok(());
    };

    info!(
        problem_id = problem.id,
        test_cases = problem.test_cases.len(),
        "Judging submission"
    );

    let judge = &ctx.settings.judge;
    let mut cleanup_guard = RetryCleanupGuard::new(&ctx.retry_tracker, &job.job_id);

    let outcome = loop {
        let attempt = judge_submission(
            ctx.sandbox.as_ref(),
            &ctx.settings,
            box_id,
            &submission,
            &problem,
            &job.cancel,
        )
        .await;

        match attempt {
            Ok(report) => {
                ctx.retry_tracker.lock().await.clear(&job.job_id);
                cleanup_guard.defuse();
                break outcome_from_report(&problem, report, judge.scoring);
            }
            Err(e) => {
                let error_str = e.to_string();
                let decision = ctx
                    .retry_tracker
                    .lock()
                    .await
                    .record_failure(&job.job_id, &error_str);

                match decision {
                    RetryDecision::Retry { attempt, .. } => {
                        let delay = calculate_backoff(
                            attempt,
                            judge.retry_base_delay_ms,
                            judge.retry_max_delay_ms,
                        );
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Sandbox failed, retrying job"
                        );
                        let cancelled = tokio::select! {
                            _ = tokio::time::sleep(delay) => false,
                            _ = job.cancel.cancelled() => true,
                        };
                        if cancelled {
                            break SubmissionOutcome::cancelled();
                        }
                    }
                    RetryDecision::Exhausted { history } => {
                        error!(
                            retry_count = history.len(),
                            error = %e,
                            "Max retries exhausted, marking submission as error"
                        );
                        cleanup_guard.defuse();
                        let info = JudgeErrorInfo::new(JudgeErrorCode::SANDBOX_FAILURE, error_str)
                            .with_attempts(history);
                        break SubmissionOutcome::system_error(info);
                    }
                }
            }
        }
    };

    commit(
        ctx.submissions.as_ref(),
        ctx.notifier.as_ref(),
        submission_id,
        outcome,
    )
    .await?;
    Ok(())
}
