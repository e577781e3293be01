//! Shared helpers for gate integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    http::{Request, Response, header::LOCATION},
};
use chrono::Utc;
use clap::Parser;
use request_gate::clock::{Clock, ManualClock};
use request_gate::{Args, build_state, create_router};
use serde_json::{Value, json};

pub const SECRET: &str = "integration-secret";

/// Upstream that describes the request it received.
pub async fn spawn_echo_upstream() -> String {
    let app = Router::new().fallback(|req: Request<Body>| async move {
        let headers = req.headers();
        Json(json!({
            "method": req.method().as_str(),
            "path": req.uri().path(),
            "query": req.uri().query(),
            "subject": headers.get("x-authenticated-subject").and_then(|v| v.to_str().ok()),
            "cookie": headers.contains_key("cookie"),
            "authorization": headers.contains_key("authorization"),
        }))
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind echo upstream");
    let addr = listener.local_addr().expect("echo upstream address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("echo upstream");
    });
    format!("http://{addr}")
}

pub struct TestGate {
    pub app: Router,
    pub clock: Arc<ManualClock>,
    pub args: Args,
}

impl TestGate {
    /// Gate whose app and collector upstreams are both a local echo server.
    pub async fn new(extra: &[&str]) -> Self {
        let upstream = spawn_echo_upstream().await;
        let mut argv = vec![
            "request-gate".to_string(),
            "--app-upstream".to_string(),
            upstream.clone(),
            "--collector-upstream".to_string(),
            upstream.clone(),
            "--collector-assets-upstream".to_string(),
            upstream,
            "--session-secret".to_string(),
            SECRET.to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));

        let args = Args::try_parse_from(argv).expect("test arguments");
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = build_state(&args, clock.clone()).expect("gate state");
        Self { app: create_router(state), clock, args }
    }

    pub fn session_token(&self, subject: &str) -> String {
        let resolver = request_gate::auth::SessionTokenResolver::new(SECRET, self.clock.clone());
        resolver.issue(subject, self.clock.now().timestamp() + 3600)
    }
}

pub fn ingest_request(path: &str, caller: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("user-agent", "integration-test")
        .header("cookie", "__session=should-not-leak");
    if let Some(ip) = caller {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder.body(Body::from(r#"{"batch":[]}"#)).expect("request build")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body extraction");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response.headers().get(LOCATION).and_then(|v| v.to_str().ok())
}
