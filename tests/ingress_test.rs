//! End-to-end tests for the ingestion proxy: path validation, per-caller
//! rate limiting, and forwarding to the collector.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::TimeDelta;
use common::{TestGate, body_json, ingest_request};
use tower::ServiceExt;

/// A fresh caller is forwarded with a full quota minus one.
#[tokio::test]
async fn fresh_caller_passes_through_with_quota_headers() {
    let gate = TestGate::new(&[]).await;

    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest/batch?compression=none", Some("203.0.113.10")))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["path"], "/batch");
    assert_eq!(body["query"], "compression=none");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["cookie"], false, "session cookie must not reach the collector");
}

/// The 101st request inside one window is rejected with a retry hint.
#[tokio::test]
async fn exhausted_caller_gets_429_with_retry_after() {
    let gate = TestGate::new(&[]).await;

    for i in 0..100 {
        let response = gate
            .app
            .clone()
            .oneshot(ingest_request("/ingest/batch", Some("203.0.113.11")))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i + 1);
    }

    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest/batch", Some("203.0.113.11")))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .expect("ascii header")
        .parse()
        .expect("numeric retry-after");
    assert!((1..=60).contains(&retry_after), "retry-after was {retry_after}");
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(body["retryAfter"], retry_after);

    // Other callers are unaffected.
    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest/batch", Some("203.0.113.12")))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::OK);
}

/// Counters start over once the window has passed.
#[tokio::test]
async fn window_reset_restores_quota() {
    let gate = TestGate::new(&["--rate-limit", "2", "--fallback-rate-limit", "1"]).await;
    let caller = Some("198.51.100.20");

    for _ in 0..2 {
        gate.app.clone().oneshot(ingest_request("/ingest/e/", caller)).await.unwrap();
    }
    let limited = gate.app.clone().oneshot(ingest_request("/ingest/e/", caller)).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    gate.clock.advance(TimeDelta::seconds(60));

    let response = gate.app.clone().oneshot(ingest_request("/ingest/e/", caller)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
}

/// Unrecognized shapes are refused before any rate limiting happens.
#[tokio::test]
async fn unrecognized_path_is_forbidden_regardless_of_quota() {
    let gate = TestGate::new(&["--rate-limit", "1", "--fallback-rate-limit", "1"]).await;
    let caller = Some("203.0.113.13");

    gate.app.clone().oneshot(ingest_request("/ingest/batch", caller)).await.unwrap();

    for path in ["/ingest/../secret", "/ingest/batch/extra", "/ingest/static/../../etc/passwd"] {
        let response = gate.app.clone().oneshot(ingest_request(path, caller)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_json(response).await["error"], "Invalid path");
    }
}

/// Hardened mode refuses ingestion traffic without a caller address.
#[tokio::test]
async fn missing_address_in_hardened_mode_is_rejected() {
    let gate = TestGate::new(&["--mode", "hardened"]).await;

    let response = gate.app.clone().oneshot(ingest_request("/ingest/e/", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Invalid request headers");
}

/// Permissive mode counts address-less traffic against one strict bucket.
#[tokio::test]
async fn missing_address_in_permissive_mode_shares_strict_bucket() {
    let gate = TestGate::new(&["--mode", "permissive", "--fallback-rate-limit", "3"]).await;

    for expected in ["2", "1", "0"] {
        let response = gate.app.clone().oneshot(ingest_request("/ingest/e/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let response = gate.app.clone().oneshot(ingest_request("/ingest/e/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = gate.app.clone().oneshot(health).await.unwrap();
    assert_eq!(body_json(response).await["mode"], "permissive");
}

/// With a separate assets mount, each prefix only serves its own rules.
#[tokio::test]
async fn assets_prefix_mounts_static_files_separately() {
    let gate = TestGate::new(&["--assets-prefix", "/ingest-assets"]).await;

    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest-assets/static/array.js", Some("203.0.113.9")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["path"], "/static/array.js");

    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest/static/array.js", Some("203.0.113.9")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// Static assets are forwarded with their directory intact.
#[tokio::test]
async fn static_assets_keep_their_path() {
    let gate = TestGate::new(&[]).await;

    let response = gate
        .app
        .clone()
        .oneshot(ingest_request("/ingest/static/array.js", Some("203.0.113.14")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["path"], "/static/array.js");
}

/// Concurrent requests from one caller never exceed the limit.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_respect_limit() {
    let gate = TestGate::new(&["--rate-limit", "20", "--fallback-rate-limit", "1"]).await;

    let handles: Vec<_> = (0..60)
        .map(|_| {
            let app = gate.app.clone();
            tokio::spawn(async move {
                app.oneshot(ingest_request("/ingest/batch", Some("192.0.2.1")))
                    .await
                    .expect("request execution")
                    .status()
            })
        })
        .collect();

    let mut allowed = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.expect("task") {
            StatusCode::OK => allowed += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(allowed, 20);
    assert_eq!(limited, 40);
}
