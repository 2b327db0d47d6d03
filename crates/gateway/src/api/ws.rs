//! `GET /api/ws/timeline/{id}` (spec.md §4.B, §6) — subscribe to a
//! conversation's timeline updates. Modeled on the node gateway's
//! split-socket writer-task/reader-loop shape, stripped of authentication
//! (this surface has no per-connection credential, per spec.md §4.J).

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::timeline::broadcaster::Outbound;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub async fn ws_timeline(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CHANNEL_CAPACITY);

    let snapshot = state
        .timelines
        .lock()
        .get(&conversation_id)
        .map(|h| h.lock().clone())
        .unwrap_or_else(|| sa_domain::timeline::Timeline::new(conversation_id.clone()));
    state.broadcaster.register(&conversation_id, tx, snapshot);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let message = match outbound {
                Outbound::Frame(frame) => {
                    let Ok(json) = serde_json::to_string(&frame) else { continue };
                    Message::Text(json)
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_sink
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                    break;
                }
            };
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                let parsed = serde_json::from_str::<serde_json::Value>(&text).unwrap_or(serde_json::Value::Null);
                state.broadcaster.ack_inbound(&conversation_id, parsed);
            }
            Message::Pong(_) | Message::Ping(_) => {
                state.broadcaster.record_activity(&conversation_id);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.broadcaster.deregister(&conversation_id);
}
