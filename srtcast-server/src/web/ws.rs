//! WebSocket control endpoint.
//!
//! One connection per control client. The connection task multiplexes three
//! things over a single `select!` loop: inbound requests (dispatched and
//! answered on the same connection), the client's outbound broadcast queue,
//! and a ping timer that disconnects clients whose last pong is too old.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use srtcast_protocol::{actions, ConnectedInfo, Response};

use crate::web::dispatch;
use crate::web::state::WebState;

/// Interval between server pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A client whose last pong is older than this is disconnected.
const PONG_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    /// Optional display name for the client.
    pub name: Option<String>,
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<WebState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.name, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<WebState>,
    name: Option<String>,
    addr: SocketAddr,
) {
    let client_id = Uuid::new_v4().to_string();
    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Client_{}", &client_id[..8]));
    info!(
        "Control client connected: {} ({}) from {}",
        name, client_id, addr
    );

    let mut outbound = state.clients.register(&client_id, &name, addr).await;
    let (mut sink, mut stream) = socket.split();

    // Tell the client who it is before anything else.
    let connected = match serde_json::to_value(ConnectedInfo {
        client_id: client_id.clone(),
        name: name.clone(),
    }) {
        Ok(data) => Response::ok(actions::CONNECTED, data),
        Err(e) => {
            warn!("Failed to build connected event: {}", e);
            state.clients.unregister(&client_id).await;
            return;
        }
    };
    if sink.send(Message::Text(connected.to_json())).await.is_err() {
        state.clients.unregister(&client_id).await;
        return;
    }

    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.clients.touch(&client_id).await;
                        let response = dispatch::dispatch(&state.engine, &name, &text).await;
                        if sink.send(Message::Text(response.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame from {}", name);
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error from {}: {}", name, e);
                        break;
                    }
                }
            }
            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        if sink.send(Message::Text(message)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PONG_DEADLINE {
                    warn!("Client {} missed pong deadline; disconnecting", name);
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.clients.unregister(&client_id).await;
    info!("Control client disconnected: {} ({})", name, client_id);
}
