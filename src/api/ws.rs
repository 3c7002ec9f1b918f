// =============================================================================
// WebSocket Handler — Push-based series updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate SeriesSnapshot of the visible series on connect.
//   2. One SeriesSnapshot per data-changed event raised by the controller.
//
// A client that falls behind the broadcast channel skips the missed events
// and is sent the current snapshot instead, which supersedes them.
//
// The handler also answers Ping frames with Pong frames and cleans up on
// disconnect.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::controller::SeriesSnapshot;

/// Outbound frame: the snapshot plus per-connection sequencing.
#[derive(Serialize)]
struct SnapshotFrame<'a> {
    seq: u64,
    state_version: u64,
    #[serde(flatten)]
    snapshot: &'a SeriesSnapshot,
}

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two branches via `tokio::select!`:
///   1. **Push** — forward every broadcast snapshot to the client.
///   2. **Recv** — process incoming client frames (Ping/Pong, Close).
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before taking the initial snapshot so no event falls between.
    let mut updates = state.updates.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    let initial = state.controller.snapshot();
    if let Err(e) = send_snapshot(&mut sender, &state, &initial, &mut sequence).await {
        warn!(error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let sent = match update {
                    Ok(snapshot) => {
                        send_snapshot(&mut sender, &state, &snapshot, &mut sequence).await
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "WebSocket client lagging — resending current snapshot");
                        let current = state.controller.snapshot();
                        send_snapshot(&mut sender, &state, &current, &mut sequence).await
                    }
                    Err(RecvError::Closed) => {
                        info!("Update channel closed — disconnecting");
                        break;
                    }
                };
                if let Err(e) = sent {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Clients have nothing to say on this socket.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    info!(sent = sequence, "WebSocket connection closed");
}

/// Serialize and send one snapshot frame.
async fn send_snapshot<S>(
    sender: &mut S,
    state: &AppState,
    snapshot: &SeriesSnapshot,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;
    let frame = SnapshotFrame {
        seq: *sequence,
        state_version: state.current_state_version(),
        snapshot,
    };

    match serde_json::to_string(&frame) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(seq = *sequence, candles = snapshot.candles.len(), "WebSocket snapshot sent");
            Ok(())
        }
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize snapshot");
            Ok(())
        }
    }
}
