use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::server::carrier_ws::carrier_ws_handler;
use crate::server::frontend_ws::frontend_ws_handler;
use crate::server::state::AppState;
use crate::webhook::{handle_webhook, retry_recap, WebhookState};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "activeSessions")]
    pub active_sessions: usize,
    pub timestamp: DateTime<Utc>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.registry.active_count(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub call_id: Uuid,
    #[serde(default)]
    pub call_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub success: bool,
    pub stream_url: String,
}

pub async fn start_session(
    Json(req): Json<StartSessionRequest>,
) -> AppResult<Json<StartSessionResponse>> {
    let cfg = AppConfig::get();
    let base = cfg
        .mode
        .audio_bridge_url
        .as_deref()
        .ok_or_else(|| AppError::Configuration("AUDIO_BRIDGE_URL is not configured".into()))?;

    let stream_url = format!(
        "{}/telnyx-stream?call_id={}",
        base.trim_end_matches('/'),
        req.call_id
    );

    Ok(Json(StartSessionResponse {
        success: true,
        stream_url,
    }))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub expired: usize,
}

/// Manually triggers the transcript retention sweep, gated on the
/// `X-Cron-Secret` header matching `CRON_SECRET`. Meant for an external
/// scheduler; the process also runs this sweep on its own timer.
pub async fn run_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, StatusCode> {
    let cron_secret = &AppConfig::get().cleanup.cron_secret;
    if cron_secret.is_empty() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let provided = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != cron_secret {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let expired = crate::recap::sweep_expired_transcripts(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(CleanupResponse { expired }))
}

pub fn create_router(state: AppState, webhook_state: WebhookState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let bridge_routes = Router::new()
        .route("/health", get(health))
        .route("/start-session", post(start_session))
        .route("/telnyx-stream", get(carrier_ws_handler))
        .route("/frontend", get(frontend_ws_handler))
        .route("/internal/cleanup", post(run_cleanup))
        .with_state(state);

    let webhook_routes = Router::new()
        .route("/webhook/carrier", post(handle_webhook))
        .route("/api/calls/:call_id/recap/retry", post(retry_recap))
        .with_state(webhook_state);

    bridge_routes.merge(webhook_routes).layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::broadcast::BroadcastManager;
    use crate::server::registry::SessionRegistry;
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState {
            pool: sqlx::Pool::connect_lazy("postgres://localhost/nonexistent").unwrap(),
            registry: Arc::new(SessionRegistry::new()),
            broadcast: Arc::new(BroadcastManager::new()),
        }
    }

    #[tokio::test]
    async fn health_reports_zero_sessions_when_empty() {
        let state = test_state();
        let resp = health(State(state)).await;
        assert_eq!(resp.0.status, "ok");
        assert_eq!(resp.0.active_sessions, 0);
    }

    #[test]
    fn start_session_response_serializes_expected_shape() {
        let resp = StartSessionResponse {
            success: true,
            stream_url: "wss://bridge.example.com/telnyx-stream?call_id=abc".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["stream_url"].as_str().unwrap().contains("telnyx-stream"));
    }
}
