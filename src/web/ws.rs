//! WebSocket alert stream
//!
//! One session per dashboard client: the socket is split, the write half is
//! driven by the subscriber's delivery task and the read half only watches
//! for the client going away.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use super::AppState;
use crate::hub::{Hub, Payload};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (subscriber, queue) = hub.subscriber();
    let id = subscriber.id();
    hub.register(subscriber).await;
    info!(subscriber = %id, "Dashboard client connected");

    let (ws_sender, mut ws_receiver) = socket.split();
    let sink = ws_sender.with(|payload: Payload| {
        futures::future::ok::<_, axum::Error>(Message::Text(payload.to_string()))
    });
    let mut send_task = tokio::spawn(queue.deliver(sink, hub.clone()));

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                // Clients have nothing to say; pings are answered by axum
                Ok(_) => {}
                Err(e) => {
                    debug!(subscriber = %id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    // Whichever side finishes first ends the session. The delivery task only
    // finishes after the subscriber has left the hub (write failure, eviction
    // or shutdown).
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => {
            hub.unregister(id).await;
            let _ = send_task.await;
        }
    }

    info!(subscriber = %id, "Dashboard client disconnected");
}
