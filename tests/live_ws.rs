//! Live endpoint tests over a real socket: the hub is served on an ephemeral
//! port and viewers connect as websocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sensor_hub::config::HubConfig;
use sensor_hub::server::{build_router, AppState};
use sensor_hub::store::MemoryStore;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(max_subscribers: usize) -> (SocketAddr, AppState) {
    let mut config = HubConfig::default();
    config.broadcast.max_subscribers = max_subscribers;
    let state = AppState::from_config(Arc::new(MemoryStore::new()), &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone(), None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Result<Viewer, tungstenite::Error> {
    connect_async(format!("ws://{}/api/live", addr))
        .await
        .map(|(viewer, _)| viewer)
}

async fn next_text(viewer: &mut Viewer) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), viewer.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_subscribers(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.hub.subscriber_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "subscriber count stuck at {}, expected {}",
        state.hub.subscriber_count(),
        expected
    );
}

async fn submit(addr: SocketAddr, body: Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{}/api/sensor-data", addr))
        .json(&body)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn connected_viewer_receives_new_data_frame() {
    let (addr, state) = serve(8).await;
    let mut viewer = connect(addr).await.unwrap();
    assert_eq!(state.hub.subscriber_count(), 1);

    let status = submit(addr, json!({"temperature": 25.5, "moisture": 40, "ph": 6.8})).await;
    assert!(status.is_success());

    let frame = next_text(&mut viewer).await;
    assert_eq!(frame["event"], "new-data");
    assert_eq!(frame["data"]["temperature"], 25.5);
    assert_eq!(frame["data"]["moisture"], 40.0);
    assert_eq!(frame["data"]["ph"], 6.8);
    assert!(frame["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn rejected_reading_sends_no_frame() {
    let (addr, _state) = serve(8).await;
    let mut viewer = connect(addr).await.unwrap();

    let status = submit(addr, json!({"temperature": 25.5, "moisture": 40})).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    let status = submit(addr, json!({"temperature": 19, "moisture": 61, "ph": 6.1})).await;
    assert!(status.is_success());

    // the first frame is the valid reading
    let frame = next_text(&mut viewer).await;
    assert_eq!(frame["data"]["ph"], 6.1);
}

#[tokio::test]
async fn closing_the_socket_unsubscribes() {
    let (addr, state) = serve(8).await;
    let mut leaving = connect(addr).await.unwrap();
    let mut staying = connect(addr).await.unwrap();
    assert_eq!(state.hub.subscriber_count(), 2);

    leaving.close(None).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    let status = submit(addr, json!({"temperature": 18, "moisture": 70, "ph": 5.5})).await;
    assert!(status.is_success());
    assert_eq!(next_text(&mut staying).await["data"]["ph"], 5.5);
}

#[tokio::test]
async fn viewer_over_the_limit_is_refused() {
    let (addr, state) = serve(1).await;
    let first = connect(addr).await.unwrap();

    match connect(addr).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("second viewer admitted past the limit"),
    }
    assert_eq!(state.hub.subscriber_count(), 1);

    // the slot frees up once the first viewer leaves
    drop(first);
    wait_for_subscribers(&state, 0).await;
    let _second = connect(addr).await.unwrap();
    assert_eq!(state.hub.subscriber_count(), 1);
}
