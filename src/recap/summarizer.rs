//! LLM-backed recap summarizer: one fixed system prompt, JSON response
//! mode, temperature pinned low for consistency.

use crate::config::InferenceConfig;
use crate::error::{AppError, AppResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = "You summarize a single completed phone call transcript. \
Produce one sentence that states the concrete outcome of the call using exact values \
mentioned in the transcript (names, times, amounts). Do not speculate beyond what was said. \
Include up to two short takeaways if genuinely useful, otherwise an empty list. \
Respond with JSON only: {\"sentence\": string, \"takeaways\": string[], \"confidence\": \"high\"|\"medium\"|\"low\"}.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecapSummary {
    pub sentence: String,
    #[serde(default)]
    pub takeaways: Vec<String>,
    pub confidence: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct RecapSummarizer {
    http: Client,
    api_key: String,
    model: String,
}

impl RecapSummarizer {
    pub fn new(config: &InferenceConfig) -> Self {
        let http = Client::builder()
            .timeout(SUMMARIZE_TIMEOUT)
            .build()
            .expect("failed to build recap summarizer HTTP client");

        Self {
            http,
            api_key: config.openai_api_key.clone(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub async fn summarize(&self, transcript: &str) -> AppResult<RecapSummary> {
        let request = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: transcript,
                },
            ],
        };

        debug!(chars = transcript.len(), "calling recap summarizer");

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(AppError::NetworkError)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::AiRateLimit);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "recap summarizer server error");
            return Err(AppError::AiServerError(format!("{status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "recap summarizer api error");
            return Err(AppError::AiApiError(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiParseError(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::AiParseError("empty choices array".into()))?;

        serde_json::from_str(&content).map_err(|e| AppError::AiParseError(e.to_string()))
    }
}

/// Applies the quality guard from the recap pipeline: reject sentences
/// that are too short or look like a templated non-answer.
pub fn passes_quality_guard(sentence: &str) -> bool {
    if sentence.trim().chars().count() < 15 {
        return false;
    }
    let lower = sentence.trim().to_lowercase();
    !(lower.starts_with("call ended") || lower.starts_with("key mention"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sentence_fails_quality_guard() {
        assert!(!passes_quality_guard("Call ok."));
    }

    #[test]
    fn templated_non_answer_fails_quality_guard() {
        assert!(!passes_quality_guard("Call ended without further detail provided."));
        assert!(!passes_quality_guard("Key mention of an appointment time."));
    }

    #[test]
    fn concrete_sentence_passes_quality_guard() {
        assert!(passes_quality_guard("Sarah confirmed the delivery will arrive by 3pm Thursday."));
    }

    #[test]
    fn recap_summary_round_trips_through_json() {
        let raw = r#"{"sentence":"Test sentence here.","takeaways":["a"],"confidence":"high"}"#;
        let parsed: RecapSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.sentence, "Test sentence here.");
        assert_eq!(parsed.confidence, "high");
    }
}
