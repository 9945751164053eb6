use crate::common::{SLOW_PROBLEM, SUM_PROBLEM, TestApp, USER_ID, routes};
use serde_json::json;

mod submission_creation {
    use super::*;

    #[tokio::test]
    async fn submission_is_queued_and_judged() {
        let app = TestApp::spawn().await;
        let res = app.submit(SUM_PROBLEM, "sum").await;

        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["status"], "queued");
        let id = res.body["submission_id"].as_i64().unwrap();

        let body = app.wait_for_verdict(id).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["score"], 100);
        assert_eq!(body["language"], "python");
        assert_eq!(body["user_id"], USER_ID);
        assert_eq!(body["test_results"][0]["verdict"], "accepted");
        assert_eq!(body["test_results"][0]["actual_output"], "4\n");
        assert!(body["judged_at"].is_string());
    }

    #[tokio::test]
    async fn sample_problem_verdicts() {
        let app = TestApp::spawn().await;
        let accepted = app.create_submission(SUM_PROBLEM, "print 4").await;
        let wrong = app.create_submission(SUM_PROBLEM, "print 5").await;
        let slow = app.create_submission(SUM_PROBLEM, "sleep 2000").await;

        let body = app.wait_for_verdict(accepted).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["score"], 100);

        let body = app.wait_for_verdict(wrong).await;
        assert_eq!(body["status"], "wrong_answer");
        assert_eq!(body["score"], 0);
        assert_eq!(body["test_results"][0]["passed"], false);

        let body = app.wait_for_verdict(slow).await;
        assert_eq!(body["status"], "timeout");
        assert_eq!(body["score"], 0);
    }

    #[tokio::test]
    async fn compile_error_is_a_verdict() {
        let app = TestApp::spawn().await;
        let res = app
            .post(
                routes::SUBMISSIONS,
                &json!({
                    "user_id": USER_ID,
                    "problem_id": SUM_PROBLEM,
                    "code": "compile_error expected ';'",
                    "language": "cpp",
                }),
            )
            .await;
        assert_eq!(res.status, 202, "{}", res.text);

        let id = res.body["submission_id"].as_i64().unwrap();
        let body = app.wait_for_verdict(id).await;
        assert_eq!(body["status"], "compile_error");
        assert!(body["compile_output"].as_str().unwrap().contains("expected ';'"));
        assert_eq!(body["test_results"], json!([]));
    }

    #[tokio::test]
    async fn runtime_error_reports_stderr() {
        let app = TestApp::spawn().await;
        let id = app
            .create_submission(SUM_PROBLEM, "eprint Traceback: boom\nexit 1")
            .await;

        let body = app.wait_for_verdict(id).await;
        assert_eq!(body["status"], "runtime_error");
        assert!(
            body["test_results"][0]["stderr"]
                .as_str()
                .unwrap()
                .contains("boom")
        );
    }
}

mod submission_validation {
    use super::*;

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let app = TestApp::spawn().await;
        let res = app
            .post(
                routes::SUBMISSIONS,
                &json!({
                    "user_id": USER_ID,
                    "problem_id": SUM_PROBLEM,
                    "code": "print 4",
                    "language": "brainfuck",
                }),
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "UNSUPPORTED_LANGUAGE");
        assert_eq!(app.store.submission_count(), 0);
    }

    #[tokio::test]
    async fn empty_code_is_rejected() {
        let app = TestApp::spawn().await;
        let res = app.submit(SUM_PROBLEM, "   \n").await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_problem_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app.submit(999, "print 4").await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app
            .post(
                routes::SUBMISSIONS,
                &json!({
                    "user_id": 404,
                    "problem_id": SUM_PROBLEM,
                    "code": "print 4",
                    "language": "python",
                }),
            )
            .await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_body_is_a_validation_error() {
        let app = TestApp::spawn().await;
        let res = app
            .post_raw(routes::SUBMISSIONS, r#"{"user_id": 1, "code": "print 4"}"#)
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_submission_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app.get(&routes::submission(12345)).await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }
}

mod backpressure {
    use super::*;

    #[tokio::test]
    async fn full_queue_returns_capacity_exceeded() {
        let app = TestApp::spawn_with(|c| {
            c.judge.workers = 1;
            c.judge.queue_capacity = 1;
        })
        .await;

        let running = app
            .create_submission(SLOW_PROBLEM, "sleep 9000\nprint done")
            .await;
        app.wait_for_running(running).await;
        let queued = app.create_submission(SUM_PROBLEM, "print 4").await;

        let res = app.submit(SUM_PROBLEM, "print 4").await;
        assert_eq!(res.status, 503, "{}", res.text);
        assert_eq!(res.body["code"], "CAPACITY_EXCEEDED");
        assert_eq!(res.retry_after.as_deref(), Some("1"));
        assert_eq!(app.store.submission_count(), 2);

        let body = app.get(&routes::submission(queued)).await.body;
        assert_eq!(body["status"], "queued");
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn running_submission_can_be_cancelled() {
        let app = TestApp::spawn().await;
        let id = app
            .create_submission(SLOW_PROBLEM, "sleep 9000\nprint done")
            .await;
        app.wait_for_running(id).await;

        let res = app.delete(&routes::submission(id)).await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["state"], "cancelling");

        let body = app.wait_for_verdict(id).await;
        assert_eq!(body["status"], "cancelled");
        assert_eq!(app.sandbox.open_boxes(), 0);
    }

    #[tokio::test]
    async fn judged_submission_cannot_be_cancelled() {
        let app = TestApp::spawn().await;
        let id = app.create_submission(SUM_PROBLEM, "print 4").await;
        app.wait_for_verdict(id).await;

        let res = app.delete(&routes::submission(id)).await;
        assert_eq!(res.status, 409);
        assert_eq!(res.body["code"], "CONFLICT");

        let body = app.get(&routes::submission(id)).await.body;
        assert_eq!(body["status"], "accepted");
    }

    #[tokio::test]
    async fn superseded_submission_is_cancelled() {
        let app = TestApp::spawn_with(|c| {
            c.judge.workers = 1;
            c.judge.supersede_previous = true;
        })
        .await;

        let first = app
            .create_submission(SLOW_PROBLEM, "sleep 9000\nprint done")
            .await;
        app.wait_for_running(first).await;
        let second = app.create_submission(SLOW_PROBLEM, "print done").await;
        let third = app.create_submission(SLOW_PROBLEM, "print done").await;

        assert_eq!(app.wait_for_verdict(first).await["status"], "cancelled");
        assert_eq!(app.wait_for_verdict(second).await["status"], "cancelled");
        assert_eq!(app.wait_for_verdict(third).await["status"], "accepted");
    }

    #[tokio::test]
    async fn supersede_is_scoped_to_the_problem() {
        let app = TestApp::spawn_with(|c| c.judge.supersede_previous = true).await;

        let other = app
            .create_submission(SLOW_PROBLEM, "sleep 300\nprint done")
            .await;
        app.wait_for_running(other).await;
        let latest = app.create_submission(SUM_PROBLEM, "print 4").await;

        assert_eq!(app.wait_for_verdict(latest).await["status"], "accepted");
        assert_eq!(app.wait_for_verdict(other).await["status"], "accepted");
    }
}

mod events {
    use super::*;

    #[tokio::test]
    async fn event_stream_delivers_verdict() {
        let app = TestApp::spawn().await;
        let id = app.create_submission(SUM_PROBLEM, "print 4").await;

        let res = app.get(&routes::submission_events(id)).await;
        assert_eq!(res.status, 200);
        assert!(res.text.contains("event: verdict"), "{}", res.text);
        assert!(res.text.contains("\"status\":\"accepted\""), "{}", res.text);
    }

    #[tokio::test]
    async fn event_stream_for_unknown_submission_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app.get(&routes::submission_events(777)).await;
        assert_eq!(res.status, 404);
    }
}
