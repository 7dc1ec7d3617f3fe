mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Notify;
use webserver::config::TimeoutConfig;
use webserver::{Counter, Endpoint, ErrorKind, LifecycleState, ServerBuilder, ServerError};

/// `/sleep` notifies `entered` once the handler runs, then sleeps `delay`.
fn sleeper(delay: Duration, entered: Arc<Notify>) -> Router {
    Router::new().route(
        "/sleep",
        get(move || {
            let entered = entered.clone();
            async move {
                entered.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

async fn wait_entered(entered: &Notify) {
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("request never reached the handler");
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let entered = Arc::new(Notify::new());
    let running = common::start(
        common::builder("graceful").with_router(sleeper(Duration::from_millis(300), entered.clone())),
    )
    .await;
    assert_eq!(running.server.state(), LifecycleState::Serving);

    let url = running.url("/sleep");
    let request = tokio::spawn(async move { common::client().get(url).send().await });
    wait_entered(&entered).await;

    let server = running.server.clone();
    running.stop().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Stopped);

    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "done");
}

#[tokio::test]
async fn new_connections_refused_after_stop() {
    let running = common::start(common::builder("refusing")).await;
    let url = running.url("/readiness");

    running.stop().await.unwrap();

    let err = common::client().get(url).send().await.unwrap_err();
    assert!(err.is_connect());
}

#[tokio::test]
async fn drain_budget_exceeded_kills_hard() {
    let timeouts = TimeoutConfig::new(
        Duration::from_secs(10),
        Duration::from_secs(5),
        Duration::from_millis(300),
        Duration::ZERO,
        Duration::from_secs(10),
    );
    let entered = Arc::new(Notify::new());
    let running = common::start(
        common::builder("stubborn")
            .with_timeouts(timeouts)
            .with_router(sleeper(Duration::from_secs(30), entered.clone())),
    )
    .await;

    let url = running.url("/sleep");
    let request = tokio::spawn(async move { common::client().get(url).send().await });
    wait_entered(&entered).await;

    let server = running.server.clone();
    let started = Instant::now();
    let err = running.stop().await.unwrap_err();

    assert!(matches!(err, ServerError::ShutdownTimeout { .. }), "unexpected: {err}");
    assert_eq!(err.kind(), ErrorKind::ShutdownTimeout);
    assert_eq!(server.state(), LifecycleState::KilledHard);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn shutdown_task_window_is_waited_out() {
    let timeouts = TimeoutConfig::new(
        Duration::from_secs(2),
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::from_millis(400),
        Duration::from_secs(2),
    );
    let running = common::start(common::builder("patient").with_timeouts(timeouts)).await;

    let started = Instant::now();
    running.stop().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn bind_failure_returns_before_serving() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap().to_string();

    let server = ServerBuilder::new("occupied", address.clone())
        .with_timeouts(common::fast_timeouts())
        .build()
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), server.start())
        .await
        .expect("bind failure should return promptly")
        .unwrap_err();

    match &err {
        ServerError::Bind { address: failed, .. } => assert_eq!(failed, &address),
        other => panic!("expected bind error, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Startup);
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert_eq!(server.serving_addr().await, None);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let running = common::start(common::builder("once")).await;

    let err = running.server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyStarted));
    assert_eq!(running.server.state(), LifecycleState::Serving);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_config_never_binds() {
    let timeouts = TimeoutConfig::new(
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let err = ServerBuilder::new("", "localhost:http")
        .with_timeouts(timeouts)
        .build()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    let ServerError::InvalidConfig(errors) = err else {
        panic!("expected validation errors");
    };
    assert_eq!(errors.errors().len(), 3);
}

#[tokio::test]
async fn stop_before_bind_skips_serving() {
    let server = common::builder("early").build().unwrap();
    server.shutdown_handle().trigger();

    let result = tokio::time::timeout(Duration::from_secs(5), server.start())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert!(server.state().is_terminal());
}

#[tokio::test]
async fn operational_endpoints_under_base_path() {
    let requests = Counter::new();
    requests.add(7);

    let running = common::start(
        common::builder("ops")
            .with_base_path("/api/v1")
            .with_endpoints(vec![Endpoint::liveness()])
            .with_metrics(vec![requests.metric("requests")])
            .with_telemetry(),
    )
    .await;
    let client = common::client();

    let res = client.get(running.url("/api/v1/liveness")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let res = client.get(running.url("/api/v1/debug/vars")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let vars: Value = res.json().await.unwrap();
    assert_eq!(vars["requests"], 7);

    requests.incr();
    let vars: Value = client
        .get(running.url("/api/v1/debug/vars"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vars["requests"], 8);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn request_id_is_propagated() {
    let running = common::start(common::builder("traced").with_telemetry()).await;

    let res = common::client()
        .get(running.url("/readiness"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "abc-123");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_resolves_for_every_clone() {
    let running = common::start(common::builder("watched")).await;
    let observed = Arc::new(AtomicBool::new(false));

    let watcher = {
        let server = running.server.clone();
        let observed = observed.clone();
        tokio::spawn(async move {
            let state = server.stopped().await;
            observed.store(true, Ordering::SeqCst);
            state
        })
    };

    running.stop().await.unwrap();
    let state = watcher.await.unwrap();
    assert_eq!(state, LifecycleState::Stopped);
    assert!(observed.load(Ordering::SeqCst));
}
