use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ::common::problem::{Difficulty, Problem, TestCase, User};
use ::common::storage::MemoryStore;
use reqwest::Client;
use serde_json::Value;
use worker::ScriptedSandbox;

use server::App;
use server::config::AppConfig;

pub mod routes {
    pub const SUBMISSIONS: &str = "/api/v1/submissions";
    pub const HEALTH: &str = "/api/v1/health";
    pub const READY: &str = "/api/v1/ready";

    pub fn submission(id: i64) -> String {
        format!("/api/v1/submissions/{id}")
    }

    pub fn submission_events(id: i64) -> String {
        format!("/api/v1/submissions/{id}/events")
    }
}

/// User seeded into every test app.
pub const USER_ID: i64 = 1;
/// Easy problem, 1000 ms, one test: "2 2" -> "4".
pub const SUM_PROBLEM: i64 = 1;
/// Hard problem with a generous time limit for long-running programs.
pub const SLOW_PROBLEM: i64 = 2;

/// A running test server backed by in-memory stores and the scripted sandbox.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: Arc<MemoryStore>,
    pub sandbox: Arc<ScriptedSandbox>,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
    pub retry_after: Option<String>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a customized configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.judge.workers = 2;
        config.judge.retry_base_delay_ms = 10;
        config.judge.retry_max_delay_ms = 20;
        config.sandbox.wall_time_grace_ms = 100;
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        store.insert_user(User {
            id: USER_ID,
            username: "alice".into(),
        });
        store.insert_problem(Problem {
            id: SUM_PROBLEM,
            title: "A + B".into(),
            description: "Print the sum of two integers.".into(),
            difficulty: Difficulty::Easy,
            time_limit_ms: 1000,
            memory_limit_mb: 64,
            test_cases: vec![TestCase::new("2 2", "4")],
        });
        store.insert_problem(Problem {
            id: SLOW_PROBLEM,
            title: "Patience".into(),
            description: String::new(),
            difficulty: Difficulty::Hard,
            time_limit_ms: 10_000,
            memory_limit_mb: 64,
            test_cases: vec![TestCase::new("", "done")],
        });

        let sandbox = Arc::new(ScriptedSandbox::new());
        let app = App::build(config, store.clone(), sandbox.clone());
        let router = server::build_router(app.state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            store,
            sandbox,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_raw(&self, path: &str, body: &'static str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    /// Submit `code` as Python and return the response.
    pub async fn submit(&self, problem_id: i64, code: &str) -> TestResponse {
        self.post(
            routes::SUBMISSIONS,
            &serde_json::json!({
                "user_id": USER_ID,
                "problem_id": problem_id,
                "code": code,
                "language": "python",
            }),
        )
        .await
    }

    /// Submit and return the new submission id.
    pub async fn create_submission(&self, problem_id: i64, code: &str) -> i64 {
        let res = self.submit(problem_id, code).await;
        assert_eq!(res.status, 202, "create_submission failed: {}", res.text);
        res.body["submission_id"]
            .as_i64()
            .expect("response body should contain 'submission_id'")
    }

    /// Poll until the submission reaches a terminal status.
    pub async fn wait_for_verdict(&self, id: i64) -> Value {
        const TERMINAL: &[&str] = &[
            "accepted",
            "wrong_answer",
            "runtime_error",
            "compile_error",
            "timeout",
            "memory_exceeded",
            "error",
            "cancelled",
        ];

        for _ in 0..500 {
            let res = self.get(&routes::submission(id)).await;
            assert_eq!(res.status, 200, "get_submission failed: {}", res.text);
            let status = res.body["status"].as_str().unwrap_or_default();
            if TERMINAL.contains(&status) {
                return res.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("submission {id} was not judged in time");
    }

    /// Poll until the submission has been picked up by a worker.
    pub async fn wait_for_running(&self, id: i64) {
        for _ in 0..500 {
            let res = self.get(&routes::submission(id)).await;
            if res.body["status"] == "running" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("submission {id} never started running");
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let retry_after = res
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            text,
            body,
            retry_after,
        }
    }
}
