//! Browser signaling over WebSocket

use super::calls_handler::status_for;
use super::dto::ApiResponse;
use super::AppState;
use crate::domain::shared::value_objects::{Iccid, ModemTarget};
use crate::infrastructure::protocols::webrtc::{run_signaling, SignalMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures::{future, SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket handler for `/modems/:iccid/ws`
pub async fn signaling_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(iccid): Path<String>,
) -> Response {
    match state.calls.signaling_target(&iccid) {
        Ok((iccid, target)) => {
            ws.on_upgrade(move |socket| handle_socket(socket, state, iccid, target))
        }
        Err(e) => (
            status_for(&e),
            Json(ApiResponse::<()>::error(e.to_string())),
        )
            .into_response(),
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, iccid: Iccid, target: ModemTarget) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<SignalMessage>(32);

    info!("[{}] Signaling client connected", iccid);

    // Single writer so replies and candidates never interleave
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let write = sender.send(Message::Text(message.to_json()));
            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Failed to send signaling message: {}", e);
                    break;
                }
                Err(_) => {
                    debug!("Signaling write timed out");
                    break;
                }
            }
        }
    });

    let incoming = receiver
        .take_while(|message| {
            future::ready(matches!(message, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text),
                _ => None,
            })
        })
        .boxed();

    run_signaling(state.calls.sessions(), iccid.as_str(), target, incoming, tx).await;
    let _ = send_task.await;

    info!("[{}] Signaling client disconnected", iccid);
}
