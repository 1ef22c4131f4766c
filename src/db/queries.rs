use crate::db::models::*;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

pub type DbPool = Pool<Postgres>;

/// Database operations for calls.
pub struct CallRepo;

impl CallRepo {
    pub async fn insert(pool: &DbPool, new_call: NewCall) -> AppResult<Call> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO calls (
                id, user_id, phone_number, direction, status, created_at,
                recap_attempt_count, closing_state, pipeline_checkpoints,
                inbound_audio_health
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, '{}'::jsonb, '{}'::jsonb)
            "#,
        )
        .bind(id)
        .bind(&new_call.user_id)
        .bind(&new_call.phone_number)
        .bind(&new_call.direction)
        .bind(Call::STATUS_PENDING)
        .bind(now)
        .bind(Call::CLOSING_ACTIVE)
        .execute(pool)
        .await?;

        Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::UnknownError("failed to read back inserted call".into()))
    }

    pub async fn get(pool: &DbPool, id: Uuid) -> AppResult<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(call)
    }

    pub async fn get_by_telnyx_call_id(pool: &DbPool, telnyx_call_id: &str) -> AppResult<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE telnyx_call_id = $1")
            .bind(telnyx_call_id)
            .fetch_optional(pool)
            .await?;
        Ok(call)
    }

    /// Apply a field-level patch; only `Some` fields are written. Every
    /// field is included unconditionally in the `SET` list (bound to its
    /// current value when unset via `COALESCE`) so the statement shape
    /// never changes across calls.
    pub async fn patch(pool: &DbPool, id: Uuid, patch: CallPatch) -> AppResult<Call> {
        sqlx::query(
            r#"
            UPDATE calls SET
                status = COALESCE($2, status),
                started_at = COALESCE($3, started_at),
                ended_at = COALESCE($4, ended_at),
                telnyx_call_id = COALESCE($5, telnyx_call_id),
                outcome = COALESCE($6, outcome),
                amd_result = COALESCE($7, amd_result),
                duration_seconds = COALESCE($8, duration_seconds),
                summary = COALESCE($9, summary),
                recap_status = COALESCE($10, recap_status),
                recap_error_code = COALESCE($11, recap_error_code),
                recap_attempt_count = COALESCE($12, recap_attempt_count),
                recap_last_attempt_at = COALESCE($13, recap_last_attempt_at),
                closing_state = COALESCE($14, closing_state),
                closing_started_at = CASE WHEN $15 THEN $16 ELSE closing_started_at END,
                silence_started_at = CASE WHEN $17 THEN $18 ELSE silence_started_at END,
                reprompt_count = COALESCE($19, reprompt_count),
                last_activity_at = COALESCE($20, last_activity_at),
                ivr_path_id = COALESCE($21, ivr_path_id)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch.status)
        .bind(patch.started_at)
        .bind(patch.ended_at)
        .bind(&patch.telnyx_call_id)
        .bind(&patch.outcome)
        .bind(&patch.amd_result)
        .bind(patch.duration_seconds)
        .bind(&patch.summary)
        .bind(&patch.recap_status)
        .bind(&patch.recap_error_code)
        .bind(patch.recap_attempt_count)
        .bind(patch.recap_last_attempt_at)
        .bind(&patch.closing_state)
        .bind(patch.closing_started_at.is_some())
        .bind(patch.closing_started_at.flatten())
        .bind(patch.silence_started_at.is_some())
        .bind(patch.silence_started_at.flatten())
        .bind(patch.reprompt_count)
        .bind(patch.last_activity_at)
        .bind(patch.ivr_path_id)
        .execute(pool)
        .await?;

        Self::get(pool, id).await?.ok_or(AppError::CallNotFound)
    }

    /// Atomically merge `fields` into the call's `pipeline_checkpoints` JSON
    /// object, stamping the checkpoint key with the current timestamp.
    /// Concurrent callers for distinct keys never clobber each other because
    /// the merge happens inside the single `UPDATE`, not a read-modify-write
    /// round trip from the application.
    /// First write wins per checkpoint name: the `?` key-existence check
    /// and the merge happen inside one `UPDATE`, so concurrent calls for
    /// distinct or identical keys never race.
    pub async fn upsert_checkpoint(
        pool: &DbPool,
        id: Uuid,
        checkpoint: &str,
        fields: serde_json::Value,
    ) -> AppResult<()> {
        let entry = serde_json::json!({
            "at": Utc::now(),
            "fields": fields,
        });

        sqlx::query(
            r#"
            UPDATE calls
            SET pipeline_checkpoints = CASE
                WHEN pipeline_checkpoints ? $2 THEN pipeline_checkpoints
                ELSE pipeline_checkpoints || jsonb_build_object($2::text, $3::jsonb)
            END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(checkpoint)
        .bind(entry)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Atomic `recap_attempt_count += 1`, avoiding the read-modify-write a
    /// plain `patch` would require.
    pub async fn increment_recap_attempt_count(pool: &DbPool, id: Uuid) -> AppResult<i32> {
        let (count,): (i32,) = sqlx::query_as(
            "UPDATE calls SET recap_attempt_count = recap_attempt_count + 1 WHERE id = $1 RETURNING recap_attempt_count",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn get_with_relations(pool: &DbPool, id: Uuid) -> AppResult<CallWithRelations> {
        let call = Self::get(pool, id).await?.ok_or(AppError::CallNotFound)?;
        let context = CallContextRepo::get_by_call_id(pool, id).await?;
        let transcriptions = TranscriptionRepo::list_for_call(pool, id).await?;
        let events = CallEventRepo::list_for_call(pool, id).await?;
        Ok(CallWithRelations {
            call,
            context,
            transcriptions,
            events,
        })
    }

    /// Calls whose recap is still pending/transient-failed and whose last
    /// activity is older than `older_than`, used by the scheduled cleanup
    /// sweep to find stale transcripts worth expiring.
    pub async fn list_calls_with_expired_transcripts(
        pool: &DbPool,
        older_than: DateTime<Utc>,
    ) -> AppResult<Vec<Call>> {
        let calls = sqlx::query_as::<_, Call>(
            r#"
            SELECT * FROM calls
            WHERE status = $1
              AND last_activity_at IS NOT NULL
              AND last_activity_at < $2
            ORDER BY last_activity_at ASC
            "#,
        )
        .bind(Call::STATUS_ENDED)
        .bind(older_than)
        .fetch_all(pool)
        .await?;
        Ok(calls)
    }
}

/// Database operations for call context (planner intent, gathered info).
pub struct CallContextRepo;

impl CallContextRepo {
    pub async fn get_by_call_id(pool: &DbPool, call_id: Uuid) -> AppResult<Option<CallContext>> {
        let ctx = sqlx::query_as::<_, CallContext>("SELECT * FROM call_contexts WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(pool)
            .await?;
        Ok(ctx)
    }

    pub async fn upsert(
        pool: &DbPool,
        call_id: Uuid,
        intent_category: Option<&str>,
        intent_purpose: Option<&str>,
        company_name: Option<&str>,
        ivr_path_id: Option<Uuid>,
        gathered_info: serde_json::Value,
    ) -> AppResult<CallContext> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO call_contexts (id, call_id, intent_category, intent_purpose, company_name, ivr_path_id, gathered_info, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (call_id) DO UPDATE SET
                intent_category = excluded.intent_category,
                intent_purpose = excluded.intent_purpose,
                company_name = excluded.company_name,
                ivr_path_id = excluded.ivr_path_id,
                gathered_info = excluded.gathered_info
            "#,
        )
        .bind(id)
        .bind(call_id)
        .bind(intent_category)
        .bind(intent_purpose)
        .bind(company_name)
        .bind(ivr_path_id)
        .bind(&gathered_info)
        .bind(CallContext::STATUS_GATHERING)
        .execute(pool)
        .await?;

        Self::get_by_call_id(pool, call_id)
            .await?
            .ok_or_else(|| AppError::UnknownError("failed to read back call context".into()))
    }

    pub async fn set_status(pool: &DbPool, call_id: Uuid, status: &str) -> AppResult<()> {
        sqlx::query("UPDATE call_contexts SET status = $2 WHERE call_id = $1")
            .bind(call_id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Database operations for per-utterance transcriptions.
pub struct TranscriptionRepo;

impl TranscriptionRepo {
    pub async fn insert(
        pool: &DbPool,
        call_id: Uuid,
        speaker: &str,
        text: &str,
        confidence: Option<f64>,
    ) -> AppResult<Transcription> {
        let id = Uuid::new_v4();
        let timestamp = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO transcriptions (id, call_id, speaker, text, timestamp, confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(call_id)
        .bind(speaker)
        .bind(text)
        .bind(timestamp)
        .bind(confidence)
        .execute(pool)
        .await?;

        Ok(Transcription {
            id,
            call_id,
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp,
            confidence,
        })
    }

    pub async fn list_for_call(pool: &DbPool, call_id: Uuid) -> AppResult<Vec<Transcription>> {
        let rows = sqlx::query_as::<_, Transcription>(
            "SELECT * FROM transcriptions WHERE call_id = $1 ORDER BY timestamp ASC",
        )
        .bind(call_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Drops transcript text past the retention window; the call row and
    /// its summary are untouched.
    pub async fn delete_for_call(pool: &DbPool, call_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM transcriptions WHERE call_id = $1")
            .bind(call_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Database operations for the per-call event timeline.
pub struct CallEventRepo;

impl CallEventRepo {
    pub async fn insert(
        pool: &DbPool,
        call_id: Uuid,
        event_type: &str,
        description: Option<&str>,
        metadata: serde_json::Value,
    ) -> AppResult<CallEvent> {
        let id = Uuid::new_v4();
        let timestamp = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO call_events (id, call_id, event_type, description, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(call_id)
        .bind(event_type)
        .bind(description)
        .bind(&metadata)
        .bind(timestamp)
        .execute(pool)
        .await?;

        Ok(CallEvent {
            id,
            call_id,
            event_type: event_type.to_string(),
            description: description.map(str::to_string),
            metadata,
            timestamp,
        })
    }

    pub async fn list_for_call(pool: &DbPool, call_id: Uuid) -> AppResult<Vec<CallEvent>> {
        let rows = sqlx::query_as::<_, CallEvent>(
            "SELECT * FROM call_events WHERE call_id = $1 ORDER BY timestamp ASC",
        )
        .bind(call_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

/// Database operations for known IVR navigation paths.
pub struct IvrPathRepo;

impl IvrPathRepo {
    pub async fn get(pool: &DbPool, id: Uuid) -> AppResult<Option<IvrPath>> {
        let path = sqlx::query_as::<_, IvrPath>("SELECT * FROM ivr_paths WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(path)
    }

    pub async fn find_for_company(pool: &DbPool, company_name: &str) -> AppResult<Option<IvrPath>> {
        let path = sqlx::query_as::<_, IvrPath>(
            "SELECT * FROM ivr_paths WHERE company_name = $1 ORDER BY id LIMIT 1",
        )
        .bind(company_name)
        .fetch_optional(pool)
        .await?;
        Ok(path)
    }
}

/// Initialize the schema. Run at startup; every statement is idempotent so
/// repeated boots against the same database are harmless.
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("running database schema setup");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            direction TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            telnyx_call_id TEXT,
            outcome TEXT,
            amd_result TEXT,
            duration_seconds BIGINT,
            summary TEXT,
            recap_status TEXT,
            recap_error_code TEXT,
            recap_attempt_count INTEGER NOT NULL DEFAULT 0,
            recap_last_attempt_at TIMESTAMPTZ,
            closing_state TEXT NOT NULL DEFAULT 'active',
            closing_started_at TIMESTAMPTZ,
            silence_started_at TIMESTAMPTZ,
            reprompt_count INTEGER NOT NULL DEFAULT 0,
            pipeline_checkpoints JSONB NOT NULL DEFAULT '{}'::jsonb,
            last_activity_at TIMESTAMPTZ,
            inbound_audio_health JSONB NOT NULL DEFAULT '{}'::jsonb,
            ivr_path_id UUID
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_contexts (
            id UUID PRIMARY KEY,
            call_id UUID UNIQUE REFERENCES calls(id),
            intent_category TEXT,
            intent_purpose TEXT,
            company_name TEXT,
            ivr_path_id UUID,
            gathered_info JSONB NOT NULL DEFAULT '{}'::jsonb,
            status TEXT NOT NULL DEFAULT 'gathering'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcriptions (
            id UUID PRIMARY KEY,
            call_id UUID NOT NULL REFERENCES calls(id),
            speaker TEXT NOT NULL,
            text TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            confidence DOUBLE PRECISION
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_events (
            id UUID PRIMARY KEY,
            call_id UUID NOT NULL REFERENCES calls(id),
            event_type TEXT NOT NULL,
            description TEXT,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            timestamp TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ivr_paths (
            id UUID PRIMARY KEY,
            company_name TEXT NOT NULL,
            department TEXT,
            menu_path JSONB NOT NULL DEFAULT '[]'::jsonb
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_calls_telnyx_call_id ON calls(telnyx_call_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_calls_status_activity ON calls(status, last_activity_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transcriptions_call_id ON transcriptions(call_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_call_events_call_id ON call_events(call_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ivr_paths_company ON ivr_paths(company_name)")
        .execute(pool)
        .await?;

    info!("database schema setup complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_call(phone: &str) -> NewCall {
        NewCall {
            user_id: "user-1".to_string(),
            phone_number: phone.to_string(),
            direction: "outbound".to_string(),
        }
    }

    #[sqlx::test]
    async fn insert_then_get_round_trips(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230000")).await.unwrap();
        assert_eq!(call.status, Call::STATUS_PENDING);
        assert_eq!(call.recap_attempt_count, 0);

        let fetched = CallRepo::get(&pool, call.id).await.unwrap().unwrap();
        assert_eq!(fetched.phone_number, "+15551230000");
        Ok(())
    }

    #[sqlx::test]
    async fn patch_updates_only_set_fields(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230001")).await.unwrap();

        let patch = CallPatch {
            status: Some(Call::STATUS_ANSWERED.to_string()),
            ..Default::default()
        };
        let updated = CallRepo::patch(&pool, call.id, patch).await.unwrap();
        assert_eq!(updated.status, Call::STATUS_ANSWERED);
        assert_eq!(updated.phone_number, "+15551230001");
        Ok(())
    }

    #[sqlx::test]
    async fn checkpoint_upsert_merges_without_clobbering(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230002")).await.unwrap();

        CallRepo::upsert_checkpoint(&pool, call.id, "carrier_connected", serde_json::json!({"ok": true}))
            .await
            .unwrap();
        CallRepo::upsert_checkpoint(&pool, call.id, "inference_connected", serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let fetched = CallRepo::get(&pool, call.id).await.unwrap().unwrap();
        let checkpoints = fetched.pipeline_checkpoints.as_object().unwrap();
        assert!(checkpoints.contains_key("carrier_connected"));
        assert!(checkpoints.contains_key("inference_connected"));
        Ok(())
    }

    #[sqlx::test]
    async fn checkpoint_upsert_is_first_write_wins(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230009")).await.unwrap();

        CallRepo::upsert_checkpoint(&pool, call.id, "call_started", serde_json::json!({"attempt": 1}))
            .await
            .unwrap();
        CallRepo::upsert_checkpoint(&pool, call.id, "call_started", serde_json::json!({"attempt": 2}))
            .await
            .unwrap();

        let fetched = CallRepo::get(&pool, call.id).await.unwrap().unwrap();
        let entry = &fetched.pipeline_checkpoints["call_started"];
        assert_eq!(entry["fields"]["attempt"], 1);
        Ok(())
    }

    #[sqlx::test]
    async fn increment_recap_attempt_count_is_atomic_add(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230010")).await.unwrap();

        let first = CallRepo::increment_recap_attempt_count(&pool, call.id).await.unwrap();
        let second = CallRepo::increment_recap_attempt_count(&pool, call.id).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        Ok(())
    }

    #[sqlx::test]
    async fn transcriptions_list_in_timestamp_order(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230003")).await.unwrap();

        TranscriptionRepo::insert(&pool, call.id, Transcription::SPEAKER_AGENT, "hello", None)
            .await
            .unwrap();
        TranscriptionRepo::insert(&pool, call.id, Transcription::SPEAKER_REMOTE, "hi there", Some(0.92))
            .await
            .unwrap();

        let rows = TranscriptionRepo::list_for_call(&pool, call.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text, "hello");
        Ok(())
    }

    #[sqlx::test]
    async fn call_context_upsert_is_idempotent_on_call_id(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230004")).await.unwrap();

        CallContextRepo::upsert(
            &pool,
            call.id,
            Some("billing"),
            None,
            Some("Acme Corp"),
            None,
            serde_json::json!({}),
        )
        .await
        .unwrap();
        CallContextRepo::upsert(
            &pool,
            call.id,
            Some("billing"),
            Some("dispute a charge"),
            Some("Acme Corp"),
            None,
            serde_json::json!({"account_number": "12345"}),
        )
        .await
        .unwrap();

        let ctx = CallContextRepo::get_by_call_id(&pool, call.id).await.unwrap().unwrap();
        assert_eq!(ctx.intent_purpose.as_deref(), Some("dispute a charge"));
        assert_eq!(ctx.gathered_info_map().get("account_number").unwrap(), "12345");
        Ok(())
    }

    #[sqlx::test]
    async fn get_with_relations_collects_everything(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let call = CallRepo::insert(&pool, new_call("+15551230005")).await.unwrap();
        TranscriptionRepo::insert(&pool, call.id, Transcription::SPEAKER_AGENT, "hello", None)
            .await
            .unwrap();
        CallEventRepo::insert(&pool, call.id, "carrier_connected", None, serde_json::json!({}))
            .await
            .unwrap();

        let full = CallRepo::get_with_relations(&pool, call.id).await.unwrap();
        assert_eq!(full.transcriptions.len(), 1);
        assert_eq!(full.events.len(), 1);
        assert!(full.context.is_none());
        Ok(())
    }

    #[sqlx::test]
    async fn get_missing_call_is_not_found(pool: DbPool) -> sqlx::Result<()> {
        init_db(&pool).await.unwrap();
        let err = CallRepo::get_with_relations(&pool, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::CallNotFound));
        Ok(())
    }
}
