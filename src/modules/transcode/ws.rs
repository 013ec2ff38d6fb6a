use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tracing::{debug, warn};

use super::dto::ProgressResponse;
use crate::state::AppState;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Time given to the client to read the final message before closing.
const FINAL_LINGER: Duration = Duration::from_secs(1);

/// Push the progress payload every 500ms until the job is done.
pub async fn transcode_progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_progress(socket, state, id))
}

async fn push_progress(socket: WebSocket, state: AppState, video_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let lookup = state.coordinator.progress(&video_id).await;
                let body = match ProgressResponse::from_lookup(&video_id, lookup) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(video_id = %video_id, "Progress lookup failed: {}", e);
                        break;
                    }
                };

                let json = match serde_json::to_string(&body) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode progress: {}", e);
                        break;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    debug!(video_id = %video_id, "Progress socket closed by client");
                    return;
                }

                if body.is_final() {
                    tokio::time::sleep(FINAL_LINGER).await;
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
