//! Fold per-test results into the terminal submission state.

use common::SubmissionStatus;
use common::config::ScoringPolicy;
use common::judge_result::{JudgeErrorCode, JudgeErrorInfo, SubmissionOutcome, TestCaseResult};
use common::notify::Notifier;
use common::problem::Problem;
use common::storage::{FinalizeResult, StoreError, SubmissionStore};
use tracing::{debug, info};

use crate::models::judge::JudgeReport;

/// Turn a judge report into the outcome that will be persisted.
pub fn outcome_from_report(
    problem: &Problem,
    report: JudgeReport,
    scoring: ScoringPolicy,
) -> SubmissionOutcome {
    match report {
        JudgeReport::CompileError(output) => SubmissionOutcome::compile_error(output),
        JudgeReport::Cancelled => SubmissionOutcome::cancelled(),
        JudgeReport::Completed(results) => aggregate(problem, results, scoring),
    }
}

/// Reassemble results by index and derive status, score and totals.
///
/// Results may arrive in any order but must cover every test case exactly
/// once. Anything else is an infrastructure error.
pub fn aggregate(
    problem: &Problem,
    mut results: Vec<TestCaseResult>,
    scoring: ScoringPolicy,
) -> SubmissionOutcome {
    results.sort_by_key(|r| r.index);

    let total = problem.test_cases.len();
    let complete = results.len() == total && results.iter().enumerate().all(|(i, r)| r.index == i);
    if !complete || total == 0 {
        return SubmissionOutcome::system_error(JudgeErrorInfo::new(
            JudgeErrorCode::INCOMPLETE_RESULTS,
            format!(
                "expected results for {total} test cases, got indices {:?}",
                results.iter().map(|r| r.index).collect::<Vec<_>>()
            ),
        ));
    }

    let status = results
        .iter()
        .find(|r| !r.passed)
        .map(|r| r.verdict.as_status())
        .unwrap_or(SubmissionStatus::Accepted);

    let passed = results.iter().filter(|r| r.passed).count();
    let points = problem.points();
    let score = match scoring {
        ScoringPolicy::AllOrNothing if status.is_accepted() => points,
        ScoringPolicy::AllOrNothing => 0,
        ScoringPolicy::Partial => (points as i64 * passed as i64 / total as i64) as i32,
    };

    SubmissionOutcome {
        status,
        score,
        time_used: results.iter().map(|r| r.time_used).sum(),
        memory_used: results.iter().map(|r| r.memory_used).max().unwrap_or(0),
        test_results: results,
        compile_output: None,
        error_info: None,
    }
}

/// Persist the outcome with a single terminal transition and publish it.
///
/// A second terminal write is a no-op: nothing is stored and nothing is
/// published.
pub async fn commit(
    store: &dyn SubmissionStore,
    notifier: &dyn Notifier,
    submission_id: i64,
    outcome: SubmissionOutcome,
) -> Result<FinalizeResult, StoreError> {
    let result = store.finalize(submission_id, outcome).await?;
    match &result {
        FinalizeResult::Finalized(submission) => {
            info!(
                submission_id,
                status = %submission.status,
                score = submission.score,
                time_used = submission.time_used,
                memory_used = submission.memory_used,
                "Submission judged"
            );
            notifier.notify(submission).await;
        }
        FinalizeResult::AlreadyFinal(submission) => {
            debug!(
                submission_id,
                status = %submission.status,
                "Submission already final, skipping"
            );
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Verdict;
    use common::notify::BroadcastNotifier;
    use common::problem::{Difficulty, TestCase};
    use common::storage::MemoryStore;
    use common::submission::NewSubmission;
    use common::Language;

    fn problem(n: usize, difficulty: Difficulty) -> Problem {
        Problem {
            id: 1,
            title: "P".into(),
            description: String::new(),
            difficulty,
            time_limit_ms: 1000,
            memory_limit_mb: 64,
            test_cases: (0..n).map(|i| TestCase::new(i.to_string(), i.to_string())).collect(),
        }
    }

    fn result(index: usize, verdict: Verdict, time: u64, memory: u64) -> TestCaseResult {
        TestCaseResult {
            index,
            verdict,
            passed: verdict.is_accepted(),
            actual_output: String::new(),
            stderr: None,
            time_used: time,
            memory_used: memory,
        }
    }

    #[test]
    fn test_all_accepted_out_of_order() {
        let p = problem(3, Difficulty::Medium);
        let results = vec![
            result(2, Verdict::Accepted, 30, 100),
            result(0, Verdict::Accepted, 10, 300),
            result(1, Verdict::Accepted, 20, 200),
        ];
        let o = aggregate(&p, results, ScoringPolicy::AllOrNothing);
        assert_eq!(o.status, SubmissionStatus::Accepted);
        assert_eq!(o.score, 200);
        assert_eq!(o.time_used, 60);
        assert_eq!(o.memory_used, 300);
        let indices: Vec<usize> = o.test_results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_first_failure_in_test_order_wins() {
        let p = problem(3, Difficulty::Easy);
        let results = vec![
            result(2, Verdict::WrongAnswer, 1, 1),
            result(1, Verdict::Timeout, 1, 1),
            result(0, Verdict::Accepted, 1, 1),
        ];
        let o = aggregate(&p, results, ScoringPolicy::AllOrNothing);
        assert_eq!(o.status, SubmissionStatus::Timeout);
        assert_eq!(o.score, 0);
    }

    #[test]
    fn test_partial_scoring() {
        let p = problem(3, Difficulty::Hard);
        let results = vec![
            result(0, Verdict::Accepted, 1, 1),
            result(1, Verdict::WrongAnswer, 1, 1),
            result(2, Verdict::Accepted, 1, 1),
        ];
        let o = aggregate(&p, results, ScoringPolicy::Partial);
        assert_eq!(o.status, SubmissionStatus::WrongAnswer);
        assert_eq!(o.score, 200);
    }

    #[test]
    fn test_incomplete_results_are_an_error() {
        let p = problem(3, Difficulty::Easy);
        let missing = vec![
            result(0, Verdict::Accepted, 1, 1),
            result(2, Verdict::Accepted, 1, 1),
        ];
        let o = aggregate(&p, missing, ScoringPolicy::AllOrNothing);
        assert_eq!(o.status, SubmissionStatus::Error);
        assert_eq!(
            o.error_info.unwrap().code,
            JudgeErrorCode::INCOMPLETE_RESULTS
        );

        let duplicated = vec![
            result(0, Verdict::Accepted, 1, 1),
            result(1, Verdict::Accepted, 1, 1),
            result(1, Verdict::Accepted, 1, 1),
        ];
        let o = aggregate(&p, duplicated, ScoringPolicy::AllOrNothing);
        assert_eq!(o.status, SubmissionStatus::Error);
    }

    #[test]
    fn test_report_mapping() {
        let p = problem(1, Difficulty::Easy);
        let o = outcome_from_report(
            &p,
            JudgeReport::CompileError("boom".into()),
            ScoringPolicy::AllOrNothing,
        );
        assert_eq!(o.status, SubmissionStatus::CompileError);
        assert_eq!(o.compile_output.as_deref(), Some("boom"));

        let o = outcome_from_report(&p, JudgeReport::Cancelled, ScoringPolicy::AllOrNothing);
        assert_eq!(o.status, SubmissionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_commit_publishes_once() {
        let store = MemoryStore::new();
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let s = store
            .create(NewSubmission {
                user_id: 1,
                problem_id: 1,
                code: "print 4".into(),
                language: Language::Python,
            })
            .await
            .unwrap();

        let p = problem(1, Difficulty::Easy);
        let outcome = aggregate(
            &p,
            vec![result(0, Verdict::Accepted, 5, 5)],
            ScoringPolicy::AllOrNothing,
        );

        let first = commit(&store, &notifier, s.id, outcome.clone()).await.unwrap();
        assert!(matches!(first, FinalizeResult::Finalized(_)));
        let second = commit(&store, &notifier, s.id, outcome).await.unwrap();
        assert!(matches!(second, FinalizeResult::AlreadyFinal(_)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.submission_id, s.id);
        assert_eq!(event.score, 100);
        assert!(rx.try_recv().is_err());
    }
}
