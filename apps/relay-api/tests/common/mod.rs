//! Shared test harness: a live relay-api server plus WebSocket helpers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_api::config::Config;
use relay_api::gateway::dispatcher::Dispatcher;
use relay_api::identity::{IdentityProvider, StaticTokenProvider};
use relay_api::store::{MemoryStore, MessageStore};
use relay_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestContext {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub identity: Arc<StaticTokenProvider>,
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        worker_id: 1,
        // Short enough for tests that wait the window out.
        typing_window_ms: 400,
        preview_chars: 80,
        handshake_timeout_secs: 2,
    }
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server() -> TestContext {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(StaticTokenProvider::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone() as Arc<dyn MessageStore>,
        &config,
    ));

    let state = AppState {
        config: Arc::new(config),
        identity: identity.clone() as Arc<dyn IdentityProvider>,
        dispatcher,
    };

    let app = relay_api::routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestContext {
        addr,
        state,
        store,
        identity,
    }
}

/// Connect to the gateway, identify with `token`, and return the stream
/// after asserting the `ready` event.
pub async fn connect_and_identify(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let identify = serde_json::json!({
        "event": "identify",
        "data": { "token": token }
    });
    ws.send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    let ready = recv_event(&mut ws, Duration::from_secs(5))
        .await
        .expect("ready event");
    assert_eq!(ready["event"], "ready");
    assert_eq!(ready["seq"], 1);
    assert!(ready["data"]["connectionId"]
        .as_str()
        .unwrap()
        .starts_with("conn_"));

    ws
}

/// Issue a token for a user on the test identity provider and connect.
pub async fn connect_user(ctx: &TestContext, user_id: &str) -> WsClient {
    let token = format!("tok_{user_id}_{}", courier_common::id::prefixed_ulid("t"));
    ctx.identity.issue(token.clone(), user_id);
    connect_and_identify(ctx.addr, &token).await
}

/// Send an event envelope over the socket.
pub async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let envelope = serde_json::json!({ "event": event, "data": data });
    ws.send(tungstenite::Message::Text(envelope.to_string().into()))
        .await
        .expect("send event");
}

/// Receive the next text event within the timeout.
pub async fn recv_event(ws: &mut WsClient, timeout: Duration) -> Option<Value> {
    loop {
        let frame = time::timeout(timeout, ws.next()).await.ok()??.ok()?;
        match frame {
            tungstenite::Message::Text(text) => {
                return Some(serde_json::from_str(&text).expect("event json"));
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

/// Collect events until the stream stays quiet for `quiet`.
pub async fn drain_events(ws: &mut WsClient, quiet: Duration) -> Vec<Value> {
    let mut events = Vec::new();
    while let Some(ev) = recv_event(ws, quiet).await {
        events.push(ev);
    }
    events
}

/// Wait until an event with the given name arrives, collecting everything
/// on the way. Panics if it does not show up within 5 seconds.
pub async fn recv_until(ws: &mut WsClient, event: &str) -> (Value, Vec<Value>) {
    let mut skipped = Vec::new();
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while time::Instant::now() < deadline {
        if let Some(ev) = recv_event(ws, Duration::from_millis(500)).await {
            if ev["event"] == event {
                return (ev, skipped);
            }
            skipped.push(ev);
        }
    }
    panic!("event `{event}` did not arrive; saw {skipped:?}");
}
