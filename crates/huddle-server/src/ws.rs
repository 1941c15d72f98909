//! WebSocket transport: one session task pair per connection.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use huddle_shared::protocol::decode_client_event;
use huddle_shared::types::normalize_identity;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::AppState;

/// Handshake metadata carried on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct Handshake {
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(state): State<AppState>,
) -> Response {
    let identity = normalize_identity(handshake.user_id);
    ws.on_upgrade(move |socket| run_session(socket, state, identity))
}

async fn run_session(socket: WebSocket, state: AppState, identity: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbox) = state.hub.connect(identity).await;
    let ping_every = Duration::from_secs(state.config.ping_interval_secs);

    // Writer: drains the outbox and keeps the socket alive.
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_every);
        ticker.tick().await;
        loop {
            tokio::select! {
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(event = event.name(), error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: one event at a time, so a connection's events keep their order.
    let router = state.router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_client_event(&text) {
                    Ok(event) => router.handle(connection, event).await,
                    Err(e) => warn!(
                        connection = %connection.short(),
                        error = %e,
                        "Ignoring malformed frame"
                    ),
                },
                Ok(Message::Binary(_)) => {
                    debug!(connection = %connection.short(), "Ignoring binary frame");
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %connection.short(), error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.disconnect(connection).await;
}
