//! `/ws`: realtime lock state stream.
//!
//! The first text frame is `{"type":"snapshot"}`, every later one is
//! `{"type":"state_change"}`. Client frames are ignored apart from close.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state))
}

async fn observe(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.broadcaster.subscribe().await;
    let id = subscription.id;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = subscription.messages.recv() => {
                let Some(text) = outgoing else { break };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.unsubscribe(id).await;
}
