//! Builds the ordered transcript the summarizer reads, from whatever rows
//! happen to exist for a call.

use crate::db::{Call, Transcription};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct TranscriptTurn {
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: Option<f64>,
}

/// Agent and remote utterances share one append-only table, so building
/// turns is just a sort-and-filter rather than an interleave of two
/// sources.
pub fn build_turns(mut rows: Vec<Transcription>) -> Vec<TranscriptTurn> {
    rows.retain(|r| !r.text.trim().is_empty());
    rows.sort_by_key(|r| r.timestamp);
    rows.into_iter()
        .map(|r| TranscriptTurn {
            speaker: r.speaker,
            text: r.text,
            timestamp: r.timestamp,
            confidence: r.confidence,
        })
        .collect()
}

pub fn render_for_prompt(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mean of the non-null ASR confidences, bucketed per the pipeline's
/// thresholds. Fewer than one scored sample defaults to medium; none at
/// all defaults to low.
pub fn estimate_confidence(turns: &[TranscriptTurn]) -> &'static str {
    let scored: Vec<f64> = turns.iter().filter_map(|t| t.confidence).collect();
    if scored.is_empty() {
        return "low";
    }
    if scored.len() < 2 {
        return "medium";
    }
    let mean = scored.iter().sum::<f64>() / scored.len() as f64;
    if mean >= 0.85 {
        "high"
    } else if mean >= 0.65 {
        "medium"
    } else {
        "low"
    }
}

/// A fallback summary synthesized directly from the transcript, used when
/// the summarizer's sentence fails the quality guard. Unlike
/// `canned_sentence`, this reflects what was actually said rather than just
/// the call's outcome.
pub fn fallback_sentence_from_turns(turns: &[TranscriptTurn]) -> String {
    const MAX_CHARS: usize = 160;

    let Some(last) = turns.iter().rev().find(|t| !t.text.trim().is_empty()) else {
        return "The call ended with no meaningful exchange captured.".to_string();
    };

    let mut text = last.text.trim().to_string();
    if text.chars().count() > MAX_CHARS {
        text = text.chars().take(MAX_CHARS).collect();
        text.push('\u{2026}');
    }

    let speaker = if last.speaker == Transcription::SPEAKER_AGENT {
        "agent"
    } else {
        "caller"
    };
    format!("The call ended after the {speaker} said: \"{text}\"")
}

/// A canned sentence used when the call was never answered, or the LLM
/// step is skipped entirely.
pub fn canned_sentence(outcome: Option<&str>) -> String {
    match outcome {
        Some("busy") => "The line was busy and the call did not connect.".to_string(),
        Some("no_answer") => "The call rang without anyone answering.".to_string(),
        Some("declined") => "The call was declined by the recipient.".to_string(),
        Some("cancelled") => "The call was cancelled before it connected.".to_string(),
        Some("voicemail") => "The call reached voicemail.".to_string(),
        _ => "The call did not connect.".to_string(),
    }
}

pub fn was_answered(call: &Call) -> bool {
    call.status == Call::STATUS_ENDED && call.started_at.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> TranscriptTurn {
        TranscriptTurn {
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            confidence: None,
        }
    }

    #[test]
    fn fallback_sentence_uses_last_nonempty_turn() {
        let turns = vec![
            turn(Transcription::SPEAKER_REMOTE, "what time does it open"),
            turn(Transcription::SPEAKER_AGENT, "nine a.m. tomorrow"),
            turn(Transcription::SPEAKER_REMOTE, "   "),
        ];
        let sentence = fallback_sentence_from_turns(&turns);
        assert!(sentence.contains("agent"));
        assert!(sentence.contains("nine a.m. tomorrow"));
    }

    #[test]
    fn fallback_sentence_truncates_long_text() {
        let long_text = "a".repeat(300);
        let turns = vec![turn(Transcription::SPEAKER_REMOTE, &long_text)];
        let sentence = fallback_sentence_from_turns(&turns);
        assert!(sentence.contains('\u{2026}'));
        assert!(sentence.len() < long_text.len() + 60);
    }

    #[test]
    fn fallback_sentence_handles_no_turns() {
        let sentence = fallback_sentence_from_turns(&[]);
        assert_eq!(sentence, "The call ended with no meaningful exchange captured.");
    }

    #[test]
    fn build_turns_drops_blank_rows_and_sorts_by_time() {
        use crate::db::Transcription;
        let now = Utc::now();
        let rows = vec![
            Transcription {
                id: uuid::Uuid::nil(),
                call_id: uuid::Uuid::nil(),
                speaker: Transcription::SPEAKER_AGENT.to_string(),
                text: "second".to_string(),
                confidence: None,
                timestamp: now + chrono::Duration::seconds(1),
            },
            Transcription {
                id: uuid::Uuid::nil(),
                call_id: uuid::Uuid::nil(),
                speaker: Transcription::SPEAKER_REMOTE.to_string(),
                text: "  ".to_string(),
                confidence: None,
                timestamp: now,
            },
            Transcription {
                id: uuid::Uuid::nil(),
                call_id: uuid::Uuid::nil(),
                speaker: Transcription::SPEAKER_REMOTE.to_string(),
                text: "first".to_string(),
                confidence: None,
                timestamp: now,
            },
        ];
        let turns = build_turns(rows);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "first");
        assert_eq!(turns[1].text, "second");
    }
}
