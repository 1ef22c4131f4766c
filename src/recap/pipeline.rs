//! Assembles a finished call's transcript, asks the summarizer for an
//! outcome sentence, and persists the result.

use crate::db::{Call, CallEvent, CallEventRepo, CallPatch, CallRepo, DbPool};
use crate::error::{AppError, AppResult};
use crate::recap::summarizer::{passes_quality_guard, RecapSummarizer};
use crate::recap::transcript::{
    build_turns, canned_sentence, estimate_confidence, fallback_sentence_from_turns,
    render_for_prompt, was_answered,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct CallCardData {
    pub call_id: Uuid,
    pub was_answered: bool,
    pub duration_sec: Option<i64>,
    pub end_reason_code: String,
    pub status: String,
    pub summary: String,
    pub takeaways: Vec<String>,
    pub confidence: String,
}

pub struct RecapRequest {
    pub call_id: Uuid,
    pub is_retry: bool,
}

pub async fn run(pool: &DbPool, summarizer: &RecapSummarizer, req: RecapRequest) -> AppResult<CallCardData> {
    let RecapRequest { call_id, is_retry } = req;

    CallRepo::patch(
        pool,
        call_id,
        CallPatch {
            recap_status: Some(Call::RECAP_PENDING.to_string()),
            recap_last_attempt_at: Some(Utc::now()),
            ..Default::default()
        },
    )
    .await?;
    if is_retry {
        CallRepo::increment_recap_attempt_count(pool, call_id).await?;
    }

    let relations = match CallRepo::get_with_relations(pool, call_id).await {
        Ok(relations) => relations,
        Err(AppError::CallNotFound) => {
            mark_failed(pool, call_id, false, &AppError::CallNotFound).await;
            return Err(AppError::CallNotFound);
        }
        Err(e) => return Err(e),
    };

    let call = relations.call;
    let turns = build_turns(relations.transcriptions);
    let answered = was_answered(&call);
    let duration_sec = call
        .started_at
        .zip(call.ended_at)
        .map(|(start, end)| (end - start).num_seconds());
    let end_reason_code = derive_end_reason_code(&call, &relations.events);

    if !answered {
        let sentence = canned_sentence(call.outcome.as_deref());
        return finish(pool, call_id, &call, answered, duration_sec, end_reason_code, sentence, vec![], "low".into()).await;
    }

    if turns.is_empty() {
        let err = AppError::NoTranscript;
        mark_failed(pool, call_id, false, &err).await;
        return Err(err);
    }

    let transcript_text = render_for_prompt(&turns);
    let confidence = estimate_confidence(&turns).to_string();

    let summary = match summarizer.summarize(&transcript_text).await {
        Ok(summary) => summary,
        Err(e) => {
            mark_failed(pool, call_id, e.recap_transient(), &e).await;
            return Err(e);
        }
    };

    let sentence = if passes_quality_guard(&summary.sentence) {
        summary.sentence
    } else {
        warn!(%call_id, "recap sentence failed quality guard, using fallback");
        fallback_sentence_from_turns(&turns)
    };

    finish(
        pool,
        call_id,
        &call,
        answered,
        duration_sec,
        end_reason_code,
        sentence,
        summary.takeaways,
        confidence,
    )
    .await
}

async fn finish(
    pool: &DbPool,
    call_id: Uuid,
    call: &Call,
    was_answered: bool,
    duration_sec: Option<i64>,
    end_reason_code: String,
    sentence: String,
    takeaways: Vec<String>,
    confidence: String,
) -> AppResult<CallCardData> {
    CallRepo::patch(
        pool,
        call_id,
        CallPatch {
            recap_status: Some(Call::RECAP_READY.to_string()),
            recap_error_code: Some(String::new()),
            summary: Some(sentence.clone()),
            ..Default::default()
        },
    )
    .await?;

    CallEventRepo::insert(
        pool,
        call_id,
        "assistant_message",
        Some(&sentence),
        serde_json::json!({ "takeaways": takeaways, "confidence": confidence }),
    )
    .await?;

    info!(%call_id, "recap ready");

    Ok(CallCardData {
        call_id,
        was_answered,
        duration_sec,
        end_reason_code,
        status: outcome_to_ui_status(call.outcome.as_deref()),
        summary: sentence,
        takeaways,
        confidence,
    })
}

async fn mark_failed(pool: &DbPool, call_id: Uuid, transient: bool, err: &AppError) {
    let status = if transient {
        Call::RECAP_FAILED_TRANSIENT
    } else {
        Call::RECAP_FAILED_PERMANENT
    };
    let result = CallRepo::patch(
        pool,
        call_id,
        CallPatch {
            recap_status: Some(status.to_string()),
            recap_error_code: Some(err.recap_error_code().to_string()),
            ..Default::default()
        },
    )
    .await;
    if let Err(e) = result {
        warn!(%call_id, error = %e, "failed to record recap failure status");
    }
}

fn derive_end_reason_code(call: &Call, events: &[CallEvent]) -> String {
    events
        .iter()
        .rev()
        .find(|e| e.event_type == "hangup")
        .and_then(|e| e.metadata.get("reason").and_then(|v| v.as_str()))
        .map(str::to_string)
        .or_else(|| call.outcome.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

fn outcome_to_ui_status(outcome: Option<&str>) -> String {
    match outcome {
        Some("completed") | Some("voicemail") => "completed",
        Some("busy") | Some("no_answer") | Some("declined") | Some("cancelled") => "failed",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_and_voicemail_map_to_completed_status() {
        assert_eq!(outcome_to_ui_status(Some("completed")), "completed");
        assert_eq!(outcome_to_ui_status(Some("voicemail")), "completed");
    }

    #[test]
    fn unreached_outcomes_map_to_failed_status() {
        assert_eq!(outcome_to_ui_status(Some("busy")), "failed");
        assert_eq!(outcome_to_ui_status(Some("no_answer")), "failed");
    }

    #[test]
    fn missing_outcome_is_unknown_status() {
        assert_eq!(outcome_to_ui_status(None), "unknown");
    }

    #[test]
    fn end_reason_code_prefers_hangup_event_metadata() {
        let call = Call {
            id: Uuid::nil(),
            user_id: "u1".to_string(),
            phone_number: "+15551234567".to_string(),
            direction: "outbound".to_string(),
            status: Call::STATUS_ENDED.to_string(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            telnyx_call_id: None,
            outcome: Some("completed".to_string()),
            amd_result: None,
            duration_seconds: None,
            summary: None,
            recap_status: None,
            recap_error_code: None,
            recap_attempt_count: 0,
            recap_last_attempt_at: None,
            closing_state: Call::CLOSING_ACTIVE.to_string(),
            closing_started_at: None,
            silence_started_at: None,
            reprompt_count: 0,
            pipeline_checkpoints: serde_json::json!({}),
            last_activity_at: None,
            inbound_audio_health: serde_json::json!({}),
            ivr_path_id: None,
        };
        let events = vec![CallEvent {
            id: Uuid::nil(),
            call_id: call.id,
            event_type: "hangup".to_string(),
            description: None,
            metadata: serde_json::json!({ "reason": "MUTUAL_GOODBYE" }),
            timestamp: Utc::now(),
        }];
        assert_eq!(derive_end_reason_code(&call, &events), "MUTUAL_GOODBYE");
    }
}
