use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per call attempt. `status`/`closing_state`/`recap_status` are
/// stored as plain text rather than Postgres enums so field-level patches
/// don't need a migration per new value.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,
    pub user_id: String,
    pub phone_number: String,
    pub direction: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub telnyx_call_id: Option<String>,
    pub outcome: Option<String>,
    pub amd_result: Option<String>,
    pub duration_seconds: Option<i64>,
    pub summary: Option<String>,
    pub recap_status: Option<String>,
    pub recap_error_code: Option<String>,
    pub recap_attempt_count: i32,
    pub recap_last_attempt_at: Option<DateTime<Utc>>,
    pub closing_state: String,
    pub closing_started_at: Option<DateTime<Utc>>,
    pub silence_started_at: Option<DateTime<Utc>>,
    pub reprompt_count: i32,
    pub pipeline_checkpoints: serde_json::Value,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub inbound_audio_health: serde_json::Value,
    pub ivr_path_id: Option<Uuid>,
}

impl Call {
    pub const STATUS_PENDING: &'static str = "pending";
    pub const STATUS_RINGING: &'static str = "ringing";
    pub const STATUS_ANSWERED: &'static str = "answered";
    pub const STATUS_ENDED: &'static str = "ended";

    pub const CLOSING_ACTIVE: &'static str = "active";
    pub const CLOSING_SAID: &'static str = "closing_said";

    pub const RECAP_PENDING: &'static str = "recap_pending";
    pub const RECAP_READY: &'static str = "recap_ready";
    pub const RECAP_FAILED_TRANSIENT: &'static str = "recap_failed_transient";
    pub const RECAP_FAILED_PERMANENT: &'static str = "recap_failed_permanent";
}

#[derive(Debug, Clone)]
pub struct NewCall {
    pub user_id: String,
    pub phone_number: String,
    pub direction: String,
}

/// A field-level patch to a call row. `None` leaves a field untouched.
/// `pipeline_checkpoints` is excluded: it is only ever updated through the
/// atomic merge in `CallRepo::upsert_checkpoint`, never a read-modify-write
/// patch.
#[derive(Debug, Clone, Default)]
pub struct CallPatch {
    pub status: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub telnyx_call_id: Option<String>,
    pub outcome: Option<String>,
    pub amd_result: Option<String>,
    pub duration_seconds: Option<i64>,
    pub summary: Option<String>,
    pub recap_status: Option<String>,
    pub recap_error_code: Option<String>,
    pub recap_attempt_count: Option<i32>,
    pub recap_last_attempt_at: Option<DateTime<Utc>>,
    pub closing_state: Option<String>,
    pub closing_started_at: Option<Option<DateTime<Utc>>>,
    pub silence_started_at: Option<Option<DateTime<Utc>>>,
    pub reprompt_count: Option<i32>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub ivr_path_id: Option<Uuid>,
}

/// Optional, one per call: the planner's intent and gathered context.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CallContext {
    pub id: Uuid,
    pub call_id: Option<Uuid>,
    pub intent_category: Option<String>,
    pub intent_purpose: Option<String>,
    pub company_name: Option<String>,
    pub ivr_path_id: Option<Uuid>,
    pub gathered_info: serde_json::Value,
    pub status: String,
}

impl CallContext {
    pub const STATUS_GATHERING: &'static str = "gathering";
    pub const STATUS_READY: &'static str = "ready";
    pub const STATUS_IN_CALL: &'static str = "in_call";
    pub const STATUS_COMPLETED: &'static str = "completed";

    /// `gathered_info` as a string map, defaulting to empty on any shape
    /// mismatch rather than failing the caller.
    pub fn gathered_info_map(&self) -> std::collections::HashMap<String, String> {
        serde_json::from_value(self.gathered_info.clone()).unwrap_or_default()
    }
}

/// Append-only: one row per ASR/agent utterance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transcription {
    pub id: Uuid,
    pub call_id: Uuid,
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: Option<f64>,
}

impl Transcription {
    pub const SPEAKER_AGENT: &'static str = "agent";
    pub const SPEAKER_REMOTE: &'static str = "remote";
}

/// Append-only: free-form pipeline/debug timeline, also recap input.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: Uuid,
    pub call_id: Uuid,
    pub event_type: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Shared, read-only: a stored DTMF navigation path for a known callee menu.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IvrPath {
    pub id: Uuid,
    pub company_name: String,
    pub department: Option<String>,
    pub menu_path: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvrStep {
    pub step: i32,
    pub prompt: String,
    pub action: String,
    pub note: Option<String>,
}

impl IvrPath {
    pub fn steps(&self) -> Vec<IvrStep> {
        serde_json::from_value(self.menu_path.clone()).unwrap_or_default()
    }
}

/// The joined view the recap pipeline and webhook handler load by `call_id`.
#[derive(Debug, Clone)]
pub struct CallWithRelations {
    pub call: Call,
    pub context: Option<CallContext>,
    pub transcriptions: Vec<Transcription>,
    pub events: Vec<CallEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_info_map_defaults_empty_on_bad_shape() {
        let ctx = CallContext {
            id: Uuid::nil(),
            call_id: None,
            intent_category: None,
            intent_purpose: None,
            company_name: None,
            ivr_path_id: None,
            gathered_info: serde_json::json!("not an object"),
            status: CallContext::STATUS_GATHERING.to_string(),
        };
        assert!(ctx.gathered_info_map().is_empty());
    }

    #[test]
    fn ivr_steps_parse_from_json() {
        let path = IvrPath {
            id: Uuid::nil(),
            company_name: "Acme".to_string(),
            department: None,
            menu_path: serde_json::json!([
                {"step": 1, "prompt": "press 1 for sales", "action": "1", "note": null}
            ]),
        };
        let steps = path.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, "1");
    }
}
