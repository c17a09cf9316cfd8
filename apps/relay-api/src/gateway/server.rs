//! WebSocket upgrade handler and per-connection transport loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::AppState;

use super::events::{ClientEvent, IdentifyPayload, InboundName};

/// Close codes (4000-range for application-level).
const CLOSE_INVALID_PAYLOAD: u16 = 4000;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: the first event must be `identify`, within the timeout.
    let handshake = time::timeout(
        Duration::from_secs(state.config.handshake_timeout_secs),
        read_identify(&mut ws_tx, &mut ws_rx),
    )
    .await;

    let token = match handshake {
        Ok(Ok(token)) => token,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "gateway handshake failed");
            return;
        }
        Err(_elapsed) => {
            let _ = send_close(&mut ws_tx, CLOSE_HANDSHAKE_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: resolve the token to a user. Unauthenticated connections
    // never reach the registry.
    let Some(user_id) = state.identity.authenticate(&token).await else {
        let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Invalid token").await;
        return;
    };

    let (connection_id, mut outbound_rx) = state.dispatcher.connect(&user_id);
    tracing::info!(%connection_id, %user_id, "gateway connection established");

    // Step 3: pump inbound frames into the dispatcher and drain the
    // connection's outbound queue into the socket, until either side ends.
    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = state.dispatcher.handle(&user_id, &connection_id, &text).await {
                            tracing::debug!(%connection_id, %err, "inbound event rejected");
                            state.dispatcher.push_error(&connection_id, &err);
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%connection_id, ?e, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(%connection_id, ?e, "outbound event serialization failed");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.dispatcher.disconnect(&user_id, &connection_id);
    tracing::info!(%connection_id, %user_id, "gateway connection closed");
}

/// Wait for the `identify` event and return its token. Anything else closes
/// the socket — the connection is not registered yet, so the stay-open rule
/// for malformed events does not apply here.
async fn read_identify(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<String, &'static str> {
    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(_) => return Err("read error during handshake"),
        };

        let text = match frame {
            Message::Text(t) => t,
            Message::Close(_) => return Err("client closed during handshake"),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        };

        let envelope: ClientEvent = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(_) => {
                let _ = send_close(ws_tx, CLOSE_INVALID_PAYLOAD, "Invalid JSON").await;
                return Err("invalid handshake json");
            }
        };

        if envelope.event != InboundName::IDENTIFY {
            let _ = send_close(ws_tx, CLOSE_NOT_AUTHENTICATED, "Expected identify").await;
            return Err("expected identify");
        }

        let payload: IdentifyPayload = match serde_json::from_value(envelope.data) {
            Ok(p) => p,
            Err(_) => {
                let _ = send_close(ws_tx, CLOSE_INVALID_PAYLOAD, "Invalid identify payload").await;
                return Err("invalid identify payload");
            }
        };

        return Ok(payload.token);
    }
    Err("connection closed before identify")
}

async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
