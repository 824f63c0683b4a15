//! ==============================================================================
//! server.rs - http + websocket surface of the hub
//! ==============================================================================
//!
//! endpoints:
//!
//! ```text
//!     | path               | method | purpose                                  |
//!     |--------------------|--------|------------------------------------------|
//!     | /api/sensor-data   | POST   | device submits {temperature,moisture,ph} |
//!     | /api/history       | GET    | backfill, optional ?date=YYYY-MM-DD       |
//!     | /api/live          | GET    | websocket, one "new-data" frame per point |
//!     | /api/health        | GET    | stored count + live viewer count          |
//!     | anything else      | GET    | static dashboard (if static_dir is set)   |
//! ```
//!
//! live viewers:
//!     each websocket runs in its own task and owns one hub subscription. the
//!     task drains the subscription queue and writes frames with a bounded
//!     send timeout; a viewer that stalls past it is disconnected.
//!
//! ==============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::HubConfig;
use crate::domain::Reading;
use crate::error::{DeliveryError, Rejection};
use crate::history::HistoryService;
use crate::hub::{BroadcastHub, Subscription};
use crate::ingest::IngestionService;
use crate::store::ReadingStore;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestionService>,
    pub history: Arc<HistoryService>,
    pub hub: BroadcastHub,
    pub store: Arc<dyn ReadingStore>,
    /// per-frame bound for live delivery
    pub send_timeout: Option<Duration>,
}

impl AppState {
    /// wire the services around `store` as described by `config`
    pub fn from_config(store: Arc<dyn ReadingStore>, config: &HubConfig) -> Self {
        let hub = BroadcastHub::new(
            config.broadcast.queue_capacity,
            config.broadcast.max_subscribers,
        );
        let io_timeout = config.storage.io_timeout();

        let ingest = IngestionService::new(store.clone(), hub.clone())
            .with_io_timeout(io_timeout)
            .with_reading_log(config.logging.show_sensor_data);
        let history = HistoryService::new(store.clone(), config.history.policy())
            .with_io_timeout(io_timeout);

        Self {
            ingest: Arc::new(ingest),
            history: Arc::new(history),
            hub,
            store,
            send_timeout: config.broadcast.send_timeout(),
        }
    }
}

pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/api/sensor-data", post(post_sensor_data))
        .route("/api/history", get(get_history))
        .route("/api/live", get(live))
        .route("/api/health", get(health));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn run_server<F>(addr: SocketAddr, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "hub listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::BadRequest(reason) => message(StatusCode::BAD_REQUEST, reason.to_string()),
            // storage details stay in the log
            Rejection::InternalError(_) => {
                message(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
            }
        }
    }
}

// ==============================================================================
// ingestion + history
// ==============================================================================

async fn post_sensor_data(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::info!(reason = %rejection.body_text(), "unreadable sensor payload");
            return message(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.ingest.submit(&payload).await {
        Ok(ack) => (
            StatusCode::OK,
            Json(json!({
                "message": "Data accepted and broadcasted.",
                "timestamp": ack.reading.timestamp,
            })),
        )
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    date: Option<String>,
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD.", s)),
    }
}

async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let date = match parse_date(params.date.as_deref()) {
        Ok(date) => date,
        Err(reason) => return message(StatusCode::BAD_REQUEST, reason),
    };

    match state.history.get_history(date).await {
        Ok(readings) => Json(readings).into_response(),
        Err(_) => message(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error."),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.len().await {
        Ok(readings) => Json(json!({
            "status": "ok",
            "readings": readings,
            "subscribers": state.hub.subscriber_count(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check could not reach store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ==============================================================================
// live stream
// ==============================================================================

/// frame sent to live viewers
#[derive(Serialize)]
struct LiveEvent<'a> {
    event: &'static str,
    data: &'a Reading,
}

async fn live(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // register before the upgrade so nothing accepted after this point is missed
    match state.hub.subscribe() {
        Ok(subscription) => {
            let send_timeout = state.send_timeout;
            ws.on_upgrade(move |socket| stream_readings(socket, subscription, send_timeout))
        }
        Err(e) => {
            tracing::warn!(error = %e, "refusing live viewer");
            message(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn stream_readings(
    mut socket: WebSocket,
    mut subscription: Subscription,
    send_timeout: Option<Duration>,
) {
    let viewer = subscription.handle().id();
    tracing::info!(viewer, "live viewer connected");

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(reading) = next else { break };
                if let Err(e) = push(&mut socket, &reading, send_timeout).await {
                    tracing::warn!(viewer, error = %e, "dropping live viewer");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // viewers have nothing to say; pings are answered by the library
                Some(Ok(_)) => {}
            },
        }
    }

    // dropping the subscription unsubscribes
    drop(subscription);
    tracing::info!(viewer, "live viewer disconnected");
}

async fn push(
    socket: &mut WebSocket,
    reading: &Reading,
    send_timeout: Option<Duration>,
) -> Result<(), DeliveryError> {
    let text = serde_json::to_string(&LiveEvent {
        event: "new-data",
        data: reading,
    })?;

    let send = socket.send(Message::Text(text.into()));
    match send_timeout {
        Some(limit) => tokio::time::timeout(limit, send)
            .await
            .map_err(|_| DeliveryError::Timeout(limit))?
            .map_err(|_| DeliveryError::Disconnected),
        None => send.await.map_err(|_| DeliveryError::Disconnected),
    }
}
