//! Post-call recap pipeline: transcript assembly, LLM summarization, and
//! the retention sweep that expires stale transcripts.

pub mod pipeline;
pub mod summarizer;
pub mod transcript;

pub use pipeline::{run, CallCardData, RecapRequest};
pub use summarizer::RecapSummarizer;

use crate::db::{CallRepo, DbPool};
use chrono::{Duration, Utc};
use tracing::{info, warn};

const TRANSCRIPT_RETENTION_DAYS: i64 = 30;

/// Finds calls past the retention window and clears their transcript text,
/// leaving the summary and metadata intact. Meant to be run on a timer or
/// behind the `CRON_SECRET`-gated cleanup endpoint.
pub async fn sweep_expired_transcripts(pool: &DbPool) -> crate::error::AppResult<usize> {
    let cutoff = Utc::now() - Duration::days(TRANSCRIPT_RETENTION_DAYS);
    let calls = CallRepo::list_calls_with_expired_transcripts(pool, cutoff).await?;
    let count = calls.len();
    for call in calls {
        if let Err(e) = crate::db::TranscriptionRepo::delete_for_call(pool, call.id).await {
            warn!(call_id = %call.id, error = %e, "failed to expire transcript");
        }
    }
    info!(count, "expired stale transcripts");
    Ok(count)
}
