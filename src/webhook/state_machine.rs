//! The webhook-driven call state machine: one carrier event at a time,
//! tolerant of reordering and missing fields, never failing the HTTP
//! response.

use crate::config::AppConfig;
use crate::db::{
    Call, CallContextRepo, CallEventRepo, CallPatch, CallRepo, DbPool, IvrPathRepo, Transcription,
    TranscriptionRepo,
};
use crate::error::AppResult;
use crate::recap::{self, RecapRequest, RecapSummarizer};
use crate::webhook::carrier_client::CarrierClient;
use crate::webhook::closing::{classify, is_farewell, ClosingClassification};
use crate::webhook::events::{CarrierWebhookBody, WebhookEvent};
use crate::webhook::ivr;
use axum::extract::State;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SILENCE_REPROMPT_AFTER: ChronoDuration = ChronoDuration::seconds(3);
const SILENCE_TIMEOUT_AFTER_CLOSING: ChronoDuration = ChronoDuration::seconds(10);
const MUTUAL_GOODBYE_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WebhookState {
    pub pool: DbPool,
    pub carrier: Arc<CarrierClient>,
    pub http: Client,
    pub summarizer: Arc<RecapSummarizer>,
}

/// Entry point mounted at `POST /webhook/carrier`. Always returns 200: the
/// carrier retries on any non-2xx, which would duplicate side effects.
pub async fn handle_webhook(
    State(state): State<WebhookState>,
    Json(body): Json<CarrierWebhookBody>,
) -> Json<serde_json::Value> {
    let event = WebhookEvent::new(&body);

    match resolve_call_id(&state.pool, &event).await {
        Some(call_id) => {
            if let Err(e) = dispatch(&state, call_id, &event).await {
                warn!(%call_id, event_type = event.event_type, error = %e, "webhook handler error, ignoring");
            }
            maybe_reprompt(&state, call_id).await;
        }
        None => {
            warn!(event_type = event.event_type, "webhook event for unrecognized call, ignoring");
        }
    }

    Json(serde_json::json!({ "received": true }))
}

/// Reachability probe for the same route under GET.
pub async fn webhook_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /api/calls/:call_id/recap/retry`. Only meaningful once the call
/// has reached a transient recap failure; re-running against a row that
/// isn't in a retryable state is a harmless no-op (the pipeline just
/// repeats the same terminal outcome).
pub async fn retry_recap(
    State(state): State<WebhookState>,
    axum::extract::Path(call_id): axum::extract::Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let card = recap::run(
        &state.pool,
        &state.summarizer,
        RecapRequest { call_id, is_retry: true },
    )
    .await?;
    Ok(Json(serde_json::to_value(card).unwrap_or_default()))
}

async fn resolve_call_id(pool: &DbPool, event: &WebhookEvent<'_>) -> Option<Uuid> {
    if let Some(state) = event.client_state() {
        return Some(state.call_id);
    }
    let telnyx_id = event.telnyx_call_id()?;
    CallRepo::get_by_telnyx_call_id(pool, telnyx_id)
        .await
        .ok()
        .flatten()
        .map(|c| c.id)
}

async fn dispatch(state: &WebhookState, call_id: Uuid, event: &WebhookEvent<'_>) -> AppResult<()> {
    match event.event_type {
        "call.initiated" => handle_call_initiated(state, call_id, event).await,
        "call.answered" => handle_call_answered(state, call_id, event).await,
        "call.machine.detection.ended" => handle_machine_detection_ended(state, call_id, event).await,
        "call.transcription" => handle_call_transcription(state, call_id, event).await,
        "call.speak.ended" => handle_call_speak_ended(state, call_id).await,
        "call.hangup" => handle_call_hangup(state, call_id, event).await,
        "streaming.started" | "streaming.stopped" | "streaming.failed" => {
            handle_streaming_event(state, call_id, event).await
        }
        "call.dtmf.received" => handle_dtmf_received(state, call_id, event).await,
        other => {
            debug!(%call_id, event_type = other, "unhandled webhook event type");
            Ok(())
        }
    }
}

async fn checkpoint(state: &WebhookState, call_id: Uuid, name: &str, fields: serde_json::Value) {
    if let Err(e) = CallRepo::upsert_checkpoint(&state.pool, call_id, name, fields.clone()).await {
        warn!(%call_id, checkpoint = name, error = %e, "failed to write checkpoint");
    }
    if let Err(e) = CallEventRepo::insert(&state.pool, call_id, name, None, fields).await {
        warn!(%call_id, checkpoint = name, error = %e, "failed to write checkpoint event");
    }
}

async fn handle_call_initiated(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            status: Some(Call::STATUS_RINGING.to_string()),
            telnyx_call_id: event.telnyx_call_id().map(|s| s.to_string()),
            ..Default::default()
        },
    )
    .await?;
    checkpoint(state, call_id, "call_started", serde_json::json!({})).await;
    Ok(())
}

async fn handle_call_answered(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    let now = Utc::now();
    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            status: Some(Call::STATUS_ANSWERED.to_string()),
            started_at: Some(now),
            reprompt_count: Some(0),
            silence_started_at: Some(Some(now)),
            ..Default::default()
        },
    )
    .await?;
    checkpoint(state, call_id, "call_answered", serde_json::json!({})).await;

    let call_control_id = match resolve_call_control_id(state, call_id, event).await {
        Some(id) => id,
        None => {
            warn!(%call_id, "no carrier call_control_id available; skipping carrier actions");
            return Ok(());
        }
    };

    if let Err(e) = state.carrier.transcription_start(&call_control_id).await {
        warn!(%call_id, error = %e, "failed to start carrier transcription");
    }

    let cfg = AppConfig::get();
    if cfg.mode.realtime_enabled() {
        let base = cfg.mode.audio_bridge_url.as_deref().unwrap_or_default();
        let stream_url = format!("{}/telnyx-stream?call_id={}", base.trim_end_matches('/'), call_id);
        if let Err(e) = state.carrier.streaming_start(&call_control_id, &stream_url).await {
            warn!(%call_id, error = %e, "failed to start carrier media streaming");
        }
    } else {
        trigger_agent(state, call_id, true, false, None).await;
    }

    spawn_ivr_walk_if_applicable(state, call_id, &call_control_id).await;

    Ok(())
}

async fn resolve_call_control_id(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> Option<String> {
    if let Some(id) = event.telnyx_call_id() {
        return Some(id.to_string());
    }
    CallRepo::get(&state.pool, call_id)
        .await
        .ok()
        .flatten()
        .and_then(|c| c.telnyx_call_id)
}

async fn spawn_ivr_walk_if_applicable(state: &WebhookState, call_id: Uuid, call_control_id: &str) {
    let Ok(Some(context)) = CallContextRepo::get_by_call_id(&state.pool, call_id).await else {
        return;
    };
    let Some(ivr_path_id) = context.ivr_path_id else {
        return;
    };
    let Ok(Some(path)) = IvrPathRepo::get(&state.pool, ivr_path_id).await else {
        warn!(%call_id, %ivr_path_id, "call references missing ivr path");
        return;
    };

    let steps = path.steps();
    let gathered_info = context.gathered_info_map();
    let carrier = state.carrier.clone();
    let call_control_id = call_control_id.to_string();
    tokio::spawn(async move {
        ivr::walk_ivr_path(carrier, call_control_id, steps, gathered_info).await;
    });
}

async fn handle_machine_detection_ended(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    let result = event.str_field("result").unwrap_or("human").to_string();

    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            amd_result: Some(result.clone()),
            ..Default::default()
        },
    )
    .await?;

    if result == "machine" {
        if let Some(call_control_id) = resolve_call_control_id(state, call_id, event).await {
            if let Err(e) = state.carrier.hangup(&call_control_id).await {
                warn!(%call_id, error = %e, "failed to hang up detected answering machine");
            }
        }
    } else {
        info!(%call_id, "answering machine detection: human");
    }

    Ok(())
}

async fn handle_call_transcription(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    let leg = event.leg().unwrap_or("unknown").to_string();
    let speaker = if leg == "self" {
        Transcription::SPEAKER_AGENT
    } else {
        Transcription::SPEAKER_REMOTE
    };
    let text = event.str_field("transcript").unwrap_or("").to_string();
    let is_final = event
        .payload
        .get("is_final")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !is_final || text.is_empty() {
        return Ok(());
    }

    TranscriptionRepo::insert(&state.pool, call_id, speaker, &text, None).await?;

    if speaker != Transcription::SPEAKER_REMOTE {
        // The agent's own leg: watch for it opening the closing protocol.
        // Nothing else reaches `closing_said` for the legacy (non-realtime)
        // path, since the realtime path's agent speech never comes through
        // this carrier webhook.
        if is_farewell(&text) {
            CallRepo::patch(
                &state.pool,
                call_id,
                CallPatch {
                    closing_state: Some(Call::CLOSING_SAID.to_string()),
                    closing_started_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        }
        return Ok(());
    }

    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            silence_started_at: Some(None),
            ..Default::default()
        },
    )
    .await?;

    let Some(call) = CallRepo::get(&state.pool, call_id).await? else {
        return Ok(());
    };

    if call.closing_state != Call::CLOSING_SAID {
        if !AppConfig::get().mode.realtime_enabled() {
            trigger_agent(state, call_id, false, false, Some(&text)).await;
        }
        return Ok(());
    }

    match classify(&text) {
        ClosingClassification::Continuation => {
            CallRepo::patch(
                &state.pool,
                call_id,
                CallPatch {
                    closing_state: Some(Call::CLOSING_ACTIVE.to_string()),
                    closing_started_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;
            trigger_agent(state, call_id, false, false, Some(&text)).await;
        }
        ClosingClassification::Farewell => {
            schedule_mutual_goodbye_hangup(state, call_id, event).await;
        }
        ClosingClassification::Ambiguous => {
            trigger_agent(state, call_id, false, false, Some(&text)).await;
        }
    }

    Ok(())
}

async fn schedule_mutual_goodbye_hangup(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) {
    let Some(call_control_id) = resolve_call_control_id(state, call_id, event).await else {
        return;
    };
    let carrier = state.carrier.clone();
    let pool = state.pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(MUTUAL_GOODBYE_GRACE).await;
        if let Err(e) = carrier.hangup(&call_control_id).await {
            warn!(%call_id, error = %e, "failed to hang up after mutual goodbye");
            return;
        }
        let _ = CallEventRepo::insert(
            &pool,
            call_id,
            "hangup",
            Some("MUTUAL_GOODBYE"),
            serde_json::json!({ "reason": "MUTUAL_GOODBYE" }),
        )
        .await;
    });
}

async fn handle_call_speak_ended(state: &WebhookState, call_id: Uuid) -> AppResult<()> {
    let now = Utc::now();
    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            silence_started_at: Some(Some(now)),
            ..Default::default()
        },
    )
    .await?;

    let Some(call) = CallRepo::get(&state.pool, call_id).await? else {
        return Ok(());
    };

    if call.closing_state == Call::CLOSING_SAID {
        if let Some(closing_started_at) = call.closing_started_at {
            if now - closing_started_at >= SILENCE_TIMEOUT_AFTER_CLOSING {
                if let Some(call_control_id) = call.telnyx_call_id.clone() {
                    if let Err(e) = state.carrier.hangup(&call_control_id).await {
                        warn!(%call_id, error = %e, "failed to hang up after closing silence timeout");
                    } else {
                        let _ = CallEventRepo::insert(
                            &state.pool,
                            call_id,
                            "hangup",
                            Some("SILENCE_TIMEOUT_AFTER_CLOSING"),
                            serde_json::json!({ "reason": "SILENCE_TIMEOUT_AFTER_CLOSING" }),
                        )
                        .await;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_call_hangup(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    let hangup_cause = event.str_field("hangup_cause").unwrap_or("unknown");
    let Some(call) = CallRepo::get(&state.pool, call_id).await? else {
        return Ok(());
    };
    if call.status == Call::STATUS_ENDED {
        return Ok(());
    }

    let now = Utc::now();
    let outcome = map_outcome(hangup_cause, call.amd_result.as_deref());
    let duration_seconds = call.started_at.map(|started| (now - started).num_seconds());

    CallRepo::patch(
        &state.pool,
        call_id,
        CallPatch {
            status: Some(Call::STATUS_ENDED.to_string()),
            ended_at: Some(now),
            outcome: Some(outcome.to_string()),
            duration_seconds,
            ..Default::default()
        },
    )
    .await?;
    checkpoint(
        state,
        call_id,
        "call_ended",
        serde_json::json!({ "hangup_cause": hangup_cause, "outcome": outcome }),
    )
    .await;

    if CallContextRepo::get_by_call_id(&state.pool, call_id).await.ok().flatten().is_some() {
        let _ = CallContextRepo::set_status(&state.pool, call_id, crate::db::CallContext::STATUS_COMPLETED).await;
    }

    spawn_recap(state, call_id, false);

    Ok(())
}

/// Recap runs detached from the webhook response: the carrier must get its
/// 200 back immediately, and summarization can take up to 30s.
fn spawn_recap(state: &WebhookState, call_id: Uuid, is_retry: bool) {
    let pool = state.pool.clone();
    let summarizer = state.summarizer.clone();
    tokio::spawn(async move {
        if let Err(e) = recap::run(&pool, &summarizer, RecapRequest { call_id, is_retry }).await {
            warn!(%call_id, error = %e, "recap pipeline failed");
        }
    });
}

/// Maps a carrier `hangup_cause` (and, for the natural-clearing case, the
/// AMD result) onto the call's outcome.
fn map_outcome(hangup_cause: &str, amd_result: Option<&str>) -> &'static str {
    match hangup_cause {
        "normal_clearing" | "normal" => {
            if amd_result == Some("machine") {
                "voicemail"
            } else {
                "completed"
            }
        }
        "busy" => "busy",
        "no_answer" => "no_answer",
        "call_rejected" => "declined",
        "originator_cancel" => "cancelled",
        _ => "completed",
    }
}

async fn handle_streaming_event(
    state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    info!(%call_id, event_type = event.event_type, "carrier streaming lifecycle event");

    if event.event_type == "streaming.failed" {
        warn!(%call_id, "media streaming failed, falling back to legacy agent path");
        if let Some(call_control_id) = resolve_call_control_id(state, call_id, event).await {
            if let Err(e) = state.carrier.transcription_start(&call_control_id).await {
                warn!(%call_id, error = %e, "failed to (re)start transcription after streaming failure");
            }
        }
        trigger_agent(state, call_id, true, false, None).await;
    }

    Ok(())
}

async fn handle_dtmf_received(
    _state: &WebhookState,
    call_id: Uuid,
    event: &WebhookEvent<'_>,
) -> AppResult<()> {
    let digit = event.str_field("digit").unwrap_or("?");
    info!(%call_id, digit, "dtmf received");
    Ok(())
}

/// Checked after every webhook dispatch: reprompts the agent if the remote
/// party has gone quiet for `SILENCE_REPROMPT_AFTER` while the call is
/// still active (not yet in the closing protocol).
async fn maybe_reprompt(state: &WebhookState, call_id: Uuid) {
    let Ok(Some(call)) = CallRepo::get(&state.pool, call_id).await else {
        return;
    };
    if call.status != Call::STATUS_ANSWERED || call.closing_state == Call::CLOSING_SAID {
        return;
    }
    let Some(silence_started_at) = call.silence_started_at else {
        return;
    };
    if Utc::now() - silence_started_at >= SILENCE_REPROMPT_AFTER {
        trigger_agent(state, call_id, false, true, None).await;
    }
}

async fn trigger_agent(
    state: &WebhookState,
    call_id: Uuid,
    is_opening: bool,
    is_reprompt: bool,
    transcript: Option<&str>,
) {
    let Some(url) = AppConfig::get().mode.legacy_agent_trigger_url.as_deref() else {
        debug!(%call_id, "no legacy agent trigger url configured, skipping trigger");
        return;
    };

    let body = serde_json::json!({
        "call_id": call_id,
        "is_opening": is_opening,
        "is_reprompt": is_reprompt,
        "transcript": transcript,
    });

    if let Err(e) = state.http.post(url).json(&body).send().await {
        warn!(%call_id, error = %e, "failed to trigger legacy agent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_clearing_without_amd_is_completed() {
        assert_eq!(map_outcome("normal_clearing", None), "completed");
    }

    #[test]
    fn normal_clearing_with_machine_amd_is_voicemail() {
        assert_eq!(map_outcome("normal_clearing", Some("machine")), "voicemail");
    }

    #[test]
    fn busy_maps_to_busy() {
        assert_eq!(map_outcome("busy", None), "busy");
    }

    #[test]
    fn no_answer_maps_to_no_answer() {
        assert_eq!(map_outcome("no_answer", None), "no_answer");
    }

    #[test]
    fn call_rejected_maps_to_declined() {
        assert_eq!(map_outcome("call_rejected", None), "declined");
    }

    #[test]
    fn originator_cancel_maps_to_cancelled() {
        assert_eq!(map_outcome("originator_cancel", None), "cancelled");
    }

    #[test]
    fn unknown_cause_defaults_to_completed() {
        assert_eq!(map_outcome("some_unmapped_cause", None), "completed");
    }
}
