//! Real-time slot events over WebSocket (/events)

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(events_ws))
}

/// GET /events - Stream every slot event as `{"event", "payload"}` JSON text frames
async fn events_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state.notifier.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

async fn forward_events(
    socket: WebSocket,
    mut events: tokio::sync::broadcast::Receiver<crate::services::notifier::SlotEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event client lagging, skipped events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    tracing::debug!("Event client disconnected");
}
