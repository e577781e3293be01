use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use crate::proxy::Audience;
use crate::state::AppState;

// Fallback for everything the gate let through: hand it to the application
pub async fn forward_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = format!("{}{}", state.app_upstream.trim_end_matches('/'), path_and_query);

    match state.forwarder.forward(req, &url, Audience::Application).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
