//! Bearer-authenticated REST client for carrier call-control actions.

use crate::config::CarrierConfig;
use crate::error::{AppError, AppResult};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CarrierClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for CarrierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn action_url(base_url: &str, call_control_id: &str, action: &str) -> String {
    format!(
        "{}/v2/calls/{}/actions/{}",
        base_url.trim_end_matches('/'),
        call_control_id,
        action
    )
}

impl CarrierClient {
    pub fn new(config: &CarrierConfig) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build carrier HTTP client");

        Self {
            http,
            api_key: config.telnyx_api_key.clone(),
            base_url: "https://api.telnyx.com".to_string(),
        }
    }

    async fn post_action(
        &self,
        call_control_id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> AppResult<()> {
        let url = action_url(&self.base_url, call_control_id, action);
        debug!(%call_control_id, action, "issuing carrier control action");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%call_control_id, action, %status, %body, "carrier control action failed");
            return Err(AppError::CarrierApi(format!("{action} returned {status}")));
        }

        Ok(())
    }

    pub async fn transcription_start(&self, call_control_id: &str) -> AppResult<()> {
        self.post_action(
            call_control_id,
            "transcription_start",
            json!({
                "language": "en",
                "transcription_tracks": "both",
                "interim_results": true,
            }),
        )
        .await
    }

    pub async fn send_dtmf(&self, call_control_id: &str, digits: &str) -> AppResult<()> {
        self.post_action(call_control_id, "send_dtmf", json!({ "digits": digits }))
            .await
    }

    pub async fn hangup(&self, call_control_id: &str) -> AppResult<()> {
        self.post_action(call_control_id, "hangup", json!({})).await
    }

    pub async fn streaming_start(&self, call_control_id: &str, stream_url: &str) -> AppResult<()> {
        self.post_action(
            call_control_id,
            "streaming_start",
            json!({ "stream_url": stream_url }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_url_joins_base_call_id_and_action() {
        let url = action_url("https://api.telnyx.com", "ctrl-1", "hangup");
        assert_eq!(url, "https://api.telnyx.com/v2/calls/ctrl-1/actions/hangup");
    }

    #[test]
    fn action_url_trims_trailing_slash_on_base() {
        let url = action_url("https://api.telnyx.com/", "ctrl-1", "send_dtmf");
        assert_eq!(url, "https://api.telnyx.com/v2/calls/ctrl-1/actions/send_dtmf");
    }
}
