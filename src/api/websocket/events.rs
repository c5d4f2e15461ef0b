//! Engine event stream
//!
//! Pushes every `FleetEvent` to the client as JSON. Each connection has a
//! bounded buffer; events are dropped for that client when it is full.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use super::WS_BUFFER_SIZE;
use crate::api::server::AppState;
use crate::models::FleetEvent;

pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_ws(socket, state))
}

async fn handle_events_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<FleetEvent>(WS_BUFFER_SIZE);

    info!("Events WebSocket connected");

    let mut events = BroadcastStream::new(state.engine.subscribe());

    let forward_task = tokio::spawn(async move {
        while let Some(received) = events.next().await {
            match received {
                Ok(event) => {
                    if tx.try_send(event).is_err() {
                        debug!("Events WebSocket buffer full, dropping event");
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!("Events WebSocket lagged, missed {} events", n);
                }
            }
        }
        debug!("Event channel closed");
    });

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize event: {}", e),
            }
        }
    });

    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!("Events WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = forward_task => debug!("Forward task ended"),
        _ = send_task => debug!("Send task ended"),
        _ = receive_task => debug!("Receive task ended"),
    }

    info!("Events WebSocket disconnected");
}
