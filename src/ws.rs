use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcast::{ObserverId, ObserverSink, ProgressBroadcaster};
use crate::events::WelcomeFrame;
use crate::handlers::AppState;

/// Write half of an observer's socket.
pub struct WsSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl ObserverSink for WsSink {
    async fn send_text(&self, text: String) -> anyhow::Result<()> {
        self.sender.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let sink = Arc::new(WsSink {
        sender: Mutex::new(sender),
    });
    let id = state.broadcaster.connect(sink);
    if !greet(&state.broadcaster, id).await {
        info!(observer = %id, "WebSocket closed before greeting");
        return;
    }

    // Observers only listen; inbound frames are drained to notice the close.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => {
                if is_pong(&text) {
                    debug!(observer = %id, "Pong received");
                } else {
                    debug!(observer = %id, "Ignoring client message");
                }
            }
            Err(e) => {
                warn!(observer = %id, "WebSocket receive error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.broadcaster.disconnect(id);
    info!(observer = %id, "WebSocket closed");
}

/// Tells a new observer its id; false when the socket is already gone.
async fn greet(broadcaster: &ProgressBroadcaster, id: ObserverId) -> bool {
    let frame = WelcomeFrame::new(id, broadcaster.observer_count());
    broadcaster.send_personal(&frame, id).await
}

fn is_pong(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "pong"))
        .unwrap_or(false)
}
