//! Fan-out of session callbacks to connected UI clients, keyed by call id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Message pushed to `/frontend` WebSocket subscribers for a call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum FrontendEvent {
    #[serde(rename = "transcript")]
    Transcript {
        speaker: &'static str,
        text: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error { message: String, timestamp: DateTime<Utc> },
    #[serde(rename = "end")]
    End { timestamp: DateTime<Utc> },
}

/// Per-call broadcast channels for UI fan-out sockets. A call's channel is
/// created lazily on first subscribe and torn down once its last subscriber
/// drops.
pub struct BroadcastManager {
    channels: DashMap<Uuid, broadcast::Sender<FrontendEvent>>,
}

impl std::fmt::Debug for BroadcastManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastManager")
            .field("active_calls", &self.channels.len())
            .finish()
    }
}

impl BroadcastManager {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, call_id: Uuid) -> broadcast::Receiver<FrontendEvent> {
        let tx = self
            .channels
            .entry(call_id)
            .or_insert_with(|| broadcast::channel(100).0);
        tx.subscribe()
    }

    pub fn publish(&self, call_id: Uuid, event: FrontendEvent) {
        if let Some(tx) = self.channels.get(&call_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop channels with no subscribers left, called periodically by the
    /// same cleanup pass that prunes expired sessions.
    pub fn cleanup_empty(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
