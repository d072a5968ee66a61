//! End-to-end scenarios over real sockets: admission, fan-out, and the
//! operational HTTP surface. Events are injected through the hub handle;
//! no broker is required.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use skystream_server::{build_router, AppState, Config};
use skystream_streaming::compression;

const WAIT: Duration = Duration::from_secs(5);

/// A valid snapshot padded out to roughly `min_bytes`.
fn snapshot_of_size(min_bytes: usize) -> Bytes {
    let record = json!({
        "icao24": "4b1805",
        "callsign": "SWR23N",
        "origin_country": "x".repeat(min_bytes),
        "longitude": 8.5492,
        "latitude": 47.4612,
        "on_ground": false,
        "velocity": 212.4,
        "true_track": 273.0,
        "vertical_rate": -2.9,
        "geo_altitude": 10058.4
    });
    Bytes::from(serde_json::to_vec(&json!([record])).unwrap())
}

async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config).unwrap();
    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    state.readiness.set_listener_up();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while state.hub.connection_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected} connections (have {})",
            state.hub.connection_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn handshake_status(err: WsError) -> Option<u16> {
    match err {
        WsError::Http(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

#[tokio::test]
async fn token_is_required_when_configured() {
    let mut config = Config::default();
    config.websocket.token = "s3cret".to_string();
    config.scaling.rate_limit_per_ip = 100;
    let (addr, state) = spawn_server(config).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    assert_eq!(handshake_status(err), Some(401));

    let err = connect_async(format!("ws://{addr}/ws?token=wrong"))
        .await
        .unwrap_err();
    assert_eq!(handshake_status(err), Some(401));

    let (_socket, _) = connect_async(format!("ws://{addr}/ws?token=s3cret"))
        .await
        .unwrap();
    wait_for_connections(&state, 1).await;
}

#[tokio::test]
async fn broadcast_fans_out_to_every_subscriber() {
    let mut config = Config::default();
    config.websocket.max_connections = 100;
    config.scaling.rate_limit_per_ip = 100;
    let (addr, state) = spawn_server(config).await;

    let mut subscribers = Vec::new();
    for _ in 0..3 {
        let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        subscribers.push(socket);
    }
    wait_for_connections(&state, 3).await;

    let payload = snapshot_of_size(2048);
    state.hub.broadcast(payload.clone());

    for socket in &mut subscribers {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        let WsMessage::Binary(frame) = message else {
            panic!("expected binary frame, got {message:?}");
        };
        assert!(frame.len() < payload.len(), "frame should be compressed");
        assert_eq!(compression::decompress_frame(&frame).unwrap(), payload);
    }

    assert!(state
        .metrics
        .export()
        .unwrap()
        .contains("websocket_connected_clients 3"));
}

#[tokio::test]
async fn rate_limit_refuses_reconnect_storms() {
    let mut config = Config::default();
    config.scaling.rate_limit_per_ip = 2;
    let (addr, _state) = spawn_server(config).await;

    let (_c1, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (_c2, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    assert_eq!(handshake_status(err), Some(429));
}

#[tokio::test]
async fn capacity_rejection_closes_the_fresh_transport() {
    let mut config = Config::default();
    config.websocket.max_connections = 1;
    config.scaling.rate_limit_per_ip = 100;
    let (addr, state) = spawn_server(config).await;

    let (_kept, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    wait_for_connections(&state, 1).await;

    // The upgrade succeeds but the hub refuses admission; the rejected
    // subscriber sees an immediate close instead of a silent stall.
    let (mut rejected, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let outcome = timeout(WAIT, rejected.next()).await.unwrap();
    match outcome {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        other => panic!("expected close for rejected session, got {other:?}"),
    }
    assert_eq!(state.hub.connection_count(), 1);
}

#[tokio::test]
async fn operational_endpoints_answer() {
    let mut config = Config::default();
    config.scaling.rate_limit_per_ip = 100;
    let (addr, state) = spawn_server(config).await;
    let http = reqwest::Client::new();

    let health: serde_json::Value = http
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["timestamp"].is_string());
    assert!(health["version"].is_string());
    assert!(health["uptime"].is_string());

    let metrics_body = http
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_body.contains("websocket_connected_clients"));
    assert!(metrics_body.contains("kafka_consumer_lag"));

    let (_subscriber, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    wait_for_connections(&state, 1).await;
    let scale: serde_json::Value = http
        .get(format!("http://{addr}/scale-health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scale["connections"], 1);
}

#[tokio::test]
async fn degraded_node_serves_subscribers_but_reports_not_ready() {
    let mut config = Config::default();
    config.scaling.rate_limit_per_ip = 100;
    let (addr, state) = spawn_server(config).await;
    let http = reqwest::Client::new();

    // The bus consumer never came up: not ready.
    let response = http
        .get(format!("http://{addr}/ready"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);

    // Subscribers still connect; they just see no events yet.
    let (_subscriber, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    wait_for_connections(&state, 1).await;

    // Upstream recovery flips readiness.
    state.readiness.set_consumer_up();
    let response = http
        .get(format!("http://{addr}/ready"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ready");
}
