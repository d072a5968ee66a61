//! HTTP surface: subscriber ingress plus the operational endpoints.
//!
//! Ingress admission runs in order: rate limit on the client host, shared
//! token (when configured), origin allowlist, then the upgrade. Each check
//! answers with its own status code so a refused client knows why, and
//! none of them affects established sessions.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::WebSocket;
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::hub::{SessionHandle, SessionId, OUTBOUND_QUEUE_CAPACITY};
use crate::session;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/scale-health", get(scale_health_handler))
        .with_state(state)
}

pub(crate) async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let client_host = addr.ip().to_string();

    if !state.limiter.allow(&client_host) {
        warn!(origin = %client_host, "rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }

    let expected_token = &state.config.websocket.token;
    if !expected_token.is_empty()
        && params.get("token").map(String::as_str) != Some(expected_token.as_str())
    {
        warn!(origin = %client_host, "unauthorized subscriber");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    if let Err(refusal) =
        check_origin(&headers, &state.config.websocket.allowed_origins, &client_host)
    {
        return refusal;
    }

    debug!(origin = %client_host, "subscriber authorized");
    let token = params.get("token").cloned();
    ws.max_message_size(session::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| accept_session(socket, state, client_host, token))
}

/// Browser origin allowlist. Absent header is permitted (curl and native
/// clients send none); an empty allowlist is permissive, warned once at
/// startup.
fn check_origin(
    headers: &HeaderMap,
    allowed_origins: &[String],
    client_host: &str,
) -> Result<(), Response> {
    let Some(origin_value) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    if allowed_origins.is_empty() {
        return Ok(());
    }
    let origin = origin_value.to_str().unwrap_or_default();
    if allowed_origins.iter().any(|allowed| allowed == origin) {
        Ok(())
    } else {
        warn!(origin, client = %client_host, "subscriber origin not allowed");
        Err((StatusCode::FORBIDDEN, "origin not allowed").into_response())
    }
}

async fn accept_session(
    socket: WebSocket,
    state: AppState,
    origin: String,
    token: Option<String>,
) {
    let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let id = SessionId::new();
    state.hub.register(SessionHandle {
        id,
        origin,
        token,
        queue: queue_tx,
    });
    session::spawn(socket, id, queue_rx, state.hub.clone());
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": format!("{:.0?}", state.started_at.elapsed()),
    }))
}

pub(crate) async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        )
    }
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.export() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to export metrics: {e}"),
        )
            .into_response(),
    }
}

/// Consumed by the orchestration layer for scaling decisions.
pub(crate) async fn scale_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.hub.connection_count(),
    }))
}
