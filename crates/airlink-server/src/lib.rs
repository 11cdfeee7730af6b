//! Dashboard-facing surface: HTTP pull of the current snapshot, WebSocket
//! push of every subsequent one, plus status and health probes.

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use airlink_fc::state::LinkStatus;
use airlink_hub::hub::BroadcastHub;
use airlink_hub::store::StateStore;
use airlink_proto::telemetry::{TelemetryFrame, TelemetrySnapshot};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listening address, e.g. "0.0.0.0:8000".
    pub bind: String,
}

/// Shared handles the handlers work against.
pub struct AppState {
    pub store: Arc<StateStore>,
    pub hub: Arc<BroadcastHub>,
    pub link: Arc<Mutex<LinkStatus>>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// No snapshot has ever been produced. Distinct from a snapshot whose
    /// fields are all legitimately unknown.
    #[error("no telemetry received yet")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/telemetry", get(telemetry_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/ws/telemetry", get(ws_handler))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves. A bind failure is
/// the one startup error that must abort the process instead of serving.
pub async fn serve(
    cfg: &ServerConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    info!("server: listening on {}", cfg.bind);
    info!("server:   pull http://{}/api/telemetry", cfg.bind);
    info!("server:   push ws://{}/ws/telemetry", cfg.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")
}

async fn telemetry_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TelemetryFrame>, ApiError> {
    let snap = state.store.get().ok_or(ApiError::Unavailable)?;
    let age_ms = state
        .store
        .age()
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Ok(Json(TelemetryFrame::new(&snap, age_ms)))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let link = state.link.lock().unwrap().clone();
    let snapshot = state.store.get().map(|s| {
        serde_json::json!({
            "seq": s.seq,
            "ts_ms": s.ts_unix_ms,
            "age_ms": state.store.age().map(|d| d.as_millis() as u64),
        })
    });

    Json(serde_json::json!({
        "link": {
            "state": link.state.as_str(),
            "endpoint": link.endpoint,
            "messages": link.messages,
            "heartbeat_age_ms": link.hb_age().map(|d| d.as_millis() as u64),
            "last_error": link.last_error,
        },
        "snapshot": snapshot,
        "subscribers": state.hub.subscriber_count(),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "airlink",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task drains the subscriber queue onto the socket; another watches
/// the client side for a close. The server never closes a healthy
/// connection on its own; the hub ends the queue if the client stalls.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let sub = state.hub.subscribe();
    let id = sub.id;
    let mut rx = sub.rx;
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(snap) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame_now(&snap)) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                debug!("ws: send failed, client gone");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
            // inbound content is ignored; clients only listen here
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unsubscribe(id);
    info!("ws: subscriber {} disconnected", id);
}

fn frame_now(snap: &TelemetrySnapshot) -> TelemetryFrame {
    let now_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let age_ms = now_ms.saturating_sub(snap.ts_unix_ms).max(0) as u64;
    TelemetryFrame::new(snap, age_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_state() -> Arc<AppState> {
        let store = Arc::new(StateStore::new());
        let hub = Arc::new(BroadcastHub::new(store.clone(), 8));
        let link = Arc::new(Mutex::new(LinkStatus::new("udpin:0.0.0.0:14557".into())));
        Arc::new(AppState { store, hub, link })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn pull_before_any_telemetry_is_unavailable() {
        let state = app_state();
        let resp = telemetry_handler(State(state)).await.into_response();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "no telemetry received yet");
    }

    #[tokio::test]
    async fn pull_returns_snapshot_with_nulls_for_unknown() {
        let state = app_state();
        state.store.replace(Arc::new(TelemetrySnapshot {
            seq: 1,
            ts_unix_ms: 1_000,
            lat: Some(47.0),
            lon: Some(8.0),
            ..Default::default()
        }));

        let resp = telemetry_handler(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["lat"], serde_json::json!(47.0));
        assert_eq!(json["battery"], serde_json::Value::Null);
        assert_eq!(json["roll"], serde_json::Value::Null);
        assert_eq!(json["seq"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn status_reports_link_and_subscribers() {
        let state = app_state();
        let _sub = state.hub.subscribe();

        let Json(json) = status_handler(State(state)).await;
        assert_eq!(json["link"]["state"], "disconnected");
        assert_eq!(json["link"]["endpoint"], "udpin:0.0.0.0:14557");
        assert_eq!(json["snapshot"], serde_json::Value::Null);
        assert_eq!(json["subscribers"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn health_is_static_ok() {
        let Json(json) = health_handler().await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "airlink");
    }
}
