use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::IntoResponse,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::AppEvent;
use crate::models::CallState;
use crate::state::ServiceContext;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ServiceContext>,
) -> impl IntoResponse {
    let event_rx = ctx.event_tx.subscribe();
    let initial = ctx.session.state();
    ws.on_upgrade(move |socket| handle_socket(socket, event_rx, initial))
}

/// Streams every `AppEvent` as JSON. A fresh client first gets the current
/// call snapshot so it can render without polling.
async fn handle_socket(
    mut socket: WebSocket,
    mut event_rx: broadcast::Receiver<AppEvent>,
    initial: CallState,
) {
    debug!("WebSocket client connected");

    if let Ok(json) = serde_json::to_string(&serde_json::json!({ "type": "Snapshot", "data": initial })) {
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            // Forward AppEvents to the WebSocket client as JSON
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if socket.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            // Client messages carry no commands; the REST routes do that.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}
