use crate::common::{SLOW_PROBLEM, TestApp, routes};

#[tokio::test]
async fn health_reports_uptime() {
    let app = TestApp::spawn().await;
    let res = app.get(routes::HEALTH).await;

    assert_eq!(res.status, 200);
    assert_eq!(res.body["status"], "ok");
    assert!(res.body["uptime_secs"].is_u64());
    assert!(res.body["timestamp"].is_string());
}

#[tokio::test]
async fn ready_reports_queue_capacity() {
    let app = TestApp::spawn_with(|c| c.judge.queue_capacity = 8).await;
    let res = app.get(routes::READY).await;

    assert_eq!(res.status, 200);
    assert_eq!(res.body["status"], "ready");
    assert_eq!(res.body["capacity"], 8);
    assert_eq!(res.body["workers"], 2);
}

#[tokio::test]
async fn ready_is_unavailable_when_queue_is_full() {
    let app = TestApp::spawn_with(|c| {
        c.judge.workers = 1;
        c.judge.queue_capacity = 1;
    })
    .await;

    for _ in 0..4 {
        if app.submit(SLOW_PROBLEM, "sleep 5000\nprint done").await.status != 202 {
            break;
        }
    }

    let res = app.get(routes::READY).await;
    assert_eq!(res.status, 503);
    assert_eq!(res.body["status"], "saturated");
}
