//! Per-connection websocket loop.
//!
//! Each socket gets a fresh [`ClientId`] and a bounded outbound queue owned
//! by the coordinator. Inbound frames are parsed and forwarded; outbound
//! frames are written as they arrive. When the coordinator drops the queue
//! (slow client) or the peer goes away, the loop ends and reports the
//! disconnect.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::coordinator::Frame;
use crate::protocol::{ClientId, ClientMessage, ServerMessage};
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = ClientId::new();
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut frames) = mpsc::channel::<Frame>(state.client_queue_depth);

    if let Err(e) = state.coordinator.connect(client_id, outbox) {
        tracing::error!("Rejecting connection: {}", e);
        let _ = sink.close().await;
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(client = %client_id, "Outbound queue closed");
                    break;
                };
                if sink.send(Message::Text(frame.to_string())).await.is_err() {
                    tracing::debug!(client = %client_id, "Send failed, client gone");
                    break;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                if state.coordinator.dispatch(client_id, message).is_err() {
                                    tracing::error!("Coordinator stopped, closing {}", client_id);
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(client = %client_id, "Unparseable frame: {}", e);
                                if send_error(&mut sink, e.to_string()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(client = %client_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    let _ = state.coordinator.disconnect(client_id);
    let _ = sink.close().await;
}

async fn send_error<S>(sink: &mut S, message: String) -> Result<(), S::Error>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let frame = ServerMessage::Error { message };
    match serde_json::to_string(&frame) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            tracing::error!("Failed to serialize error frame: {}", e);
            Ok(())
        }
    }
}
