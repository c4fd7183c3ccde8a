//! Spectator websocket: a read-only live feed of arena events.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tokio_stream::StreamExt;

use crate::events::ArenaEvent;
use crate::web::AppState;

pub async fn spectate(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    match state.arena.add_spectator().await {
        Some((snapshot, stream)) => {
            ws.on_upgrade(move |socket| feed(socket, snapshot, stream))
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "spectator limit reached").into_response(),
    }
}

async fn feed(
    mut socket: WebSocket,
    snapshot: ArenaEvent,
    stream: impl Stream<Item = ArenaEvent> + Send + Unpin,
) {
    // The state snapshot goes out first so a late joiner sees in-progress
    // battles immediately.
    if send_event(&mut socket, &snapshot).await.is_err() {
        return;
    }

    let mut stream = stream;
    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Spectators are read-only; ignore anything they say.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ArenaEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(payload.into())).await
}
