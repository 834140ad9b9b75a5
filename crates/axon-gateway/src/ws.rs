//! WebSocket connection handling
//!
//! Each connection gets a generated subscriber id and a bounded outbound
//! channel registered with the [`SubscriberRegistry`]. The connection loop
//! forwards queued frames to the socket and parses inbound text frames as
//! control messages (subscribe / unsubscribe / ping / pong). The registry's
//! cancellation token closes the socket when the subscriber is disconnected
//! from elsewhere (probe, shutdown, duplicate id).
//!
//! [`SubscriberRegistry`]: axon_broadcast::SubscriberRegistry

use crate::server::AppState;
use axon_broadcast::Outbound;
use axon_core::protocol::{BroadcastMessage, ControlMessage, ServerControl};
use axon_core::types::SubscriberId;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handle one subscriber connection for its whole lifetime.
pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let id = SubscriberId::generate();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.subscriber_buffer);
    let cancel = state.registry.connect(id.clone(), tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Greet with the assigned id so the client can correlate its session
    let hello = BroadcastMessage::connected(id.as_str());
    if let Ok(json) = serde_json::to_string(&hello) {
        if ws_tx.send(WsMessage::Text(json)).await.is_err() {
            state.registry.disconnect(&id);
            return;
        }
    }

    loop {
        tokio::select! {
            // Disconnected elsewhere: close the socket, deliver nothing more
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }

            // Outbound frames from the dispatcher / probe
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let json = match frame {
                    Outbound::Event(event) => serde_json::to_string(&event),
                    Outbound::Ping => serde_json::to_string(&ServerControl::Ping),
                };
                let Ok(json) = json else { continue };
                if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }

            // Inbound control messages
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        for response in handle_control(&text, &id, &state) {
                            if ws_tx.send(WsMessage::Text(response)).await.is_err() {
                                state.registry.disconnect(&id);
                                return;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!(subscriber = %id, "client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                    _ => {} // Binary, Ping, Pong frames at the transport level
                }
            }
        }
    }

    state.registry.disconnect(&id);
}

/// Parse one inbound text frame. Returns JSON frames to send back.
fn handle_control(text: &str, id: &SubscriberId, state: &AppState) -> Vec<String> {
    let mut responses = Vec::new();

    match serde_json::from_str::<ControlMessage>(text) {
        Ok(ControlMessage::Subscribe { channels }) => {
            debug!(subscriber = %id, ?channels, "subscribe");
            if let Some(updated) = state.registry.subscribe(id, channels) {
                if let Ok(json) =
                    serde_json::to_string(&BroadcastMessage::subscription_update(&updated))
                {
                    responses.push(json);
                }
            }
        }
        Ok(ControlMessage::Unsubscribe { channels }) => {
            debug!(subscriber = %id, ?channels, "unsubscribe");
            if let Some(updated) = state.registry.unsubscribe(id, &channels) {
                if let Ok(json) =
                    serde_json::to_string(&BroadcastMessage::subscription_update(&updated))
                {
                    responses.push(json);
                }
            }
        }
        Ok(ControlMessage::Ping) => {
            if let Ok(json) = serde_json::to_string(&ServerControl::Pong) {
                responses.push(json);
            }
        }
        Ok(ControlMessage::Pong) => {
            state.registry.touch(id);
        }
        Err(_) => {
            warn!(
                subscriber = %id,
                "unparseable control message: {}",
                &text[..text.len().min(100)]
            );
        }
    }

    responses
}
