//! The `/frontend` fan-out WebSocket: UI clients watching a single call's
//! transcript and lifecycle events live.

use crate::server::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct FrontendQuery {
    pub call_id: Uuid,
}

pub async fn frontend_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<FrontendQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_frontend_socket(socket, query.call_id, state))
}

async fn handle_frontend_socket(socket: WebSocket, call_id: Uuid, state: AppState) {
    info!(%call_id, "frontend socket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.broadcast.subscribe(call_id);

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!(error = %e, "failed to serialize frontend event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(%call_id, skipped = n, "frontend socket lagged behind broadcast");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    info!(%call_id, "frontend socket closed by client");
                    break;
                }
                Ok(Message::Text(text)) => debug!(%call_id, %text, "ignoring frontend socket message"),
                Err(e) => {
                    warn!(%call_id, error = %e, "frontend socket read error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    info!(%call_id, "frontend socket disconnected");
}
