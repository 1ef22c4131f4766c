//! The carrier media WebSocket: one connection per active call, relaying
//! audio between the carrier and the inference service via a `Session`.

use crate::db::{CallContextRepo, DbPool};
use crate::server::broadcast::FrontendEvent;
use crate::server::state::AppState;
use crate::session::{Session, SessionEvent};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CarrierStreamQuery {
    pub call_id: Uuid,
}

pub async fn carrier_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<CarrierStreamQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_carrier_socket(socket, query.call_id, state))
}

async fn handle_carrier_socket(socket: WebSocket, call_id: Uuid, state: AppState) {
    let context_text = load_call_context_text(&state.pool, call_id).await;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Session::new(call_id, state.pool.clone(), events_tx);

    if let Err(e) = session.connect_to_inference(context_text.as_deref()).await {
        error!(%call_id, error = %e, "failed to connect session to inference service");
        return;
    }

    let (mut carrier_sink, mut carrier_stream) = socket.split();
    let (carrier_tx, mut carrier_rx) = mpsc::unbounded_channel::<Message>();
    session.attach_carrier_socket(carrier_tx).await;
    state.registry.insert(session.clone());
    info!(%call_id, "carrier media socket attached");

    let writer = tokio::spawn(async move {
        while let Some(msg) = carrier_rx.recv().await {
            if carrier_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let bridge_state = state.clone();
    let bridge = tokio::spawn(async move {
        bridge_session_events(call_id, events_rx, bridge_state).await;
    });

    while let Some(msg) = carrier_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_carrier_message(&text).await,
            Ok(Message::Close(_)) => {
                info!(%call_id, "carrier media socket closed");
                break;
            }
            Err(e) => {
                warn!(%call_id, error = %e, "carrier media socket read error");
                break;
            }
            _ => {}
        }
    }

    session.cleanup().await;
    let _ = writer.await;
    let _ = bridge.await;
}

async fn bridge_session_events(
    call_id: Uuid,
    mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    state: AppState,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            SessionEvent::Transcript { speaker, text } => {
                state.broadcast.publish(
                    call_id,
                    FrontendEvent::Transcript {
                        speaker,
                        text,
                        timestamp: Utc::now(),
                    },
                );
            }
            SessionEvent::Error(message) => {
                state.broadcast.publish(
                    call_id,
                    FrontendEvent::Error {
                        message,
                        timestamp: Utc::now(),
                    },
                );
            }
            SessionEvent::End => {
                state
                    .broadcast
                    .publish(call_id, FrontendEvent::End { timestamp: Utc::now() });
                state.registry.remove(call_id);
                break;
            }
        }
    }
}

async fn load_call_context_text(pool: &DbPool, call_id: Uuid) -> Option<String> {
    let ctx = match CallContextRepo::get_by_call_id(pool, call_id).await {
        Ok(Some(ctx)) => ctx,
        Ok(None) => return None,
        Err(e) => {
            warn!(%call_id, error = %e, "failed to load call context for session instructions");
            return None;
        }
    };

    let mut text = String::new();
    if let Some(purpose) = &ctx.intent_purpose {
        if !purpose.is_empty() {
            text.push_str("Purpose: ");
            text.push_str(purpose);
            text.push('\n');
        }
    }
    if let Some(company) = &ctx.company_name {
        text.push_str("Company: ");
        text.push_str(company);
        text.push('\n');
    }
    for (key, value) in ctx.gathered_info_map() {
        text.push_str(&key);
        text.push_str(": ");
        text.push_str(&value);
        text.push('\n');
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
