//! Wire shapes for carrier webhook POST bodies.

use base64::Engine;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CarrierWebhookBody {
    pub data: CarrierWebhookData,
}

#[derive(Debug, Deserialize)]
pub struct CarrierWebhookData {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Decoded from the base64 JSON `client_state` carried on most carrier
/// event payloads.
#[derive(Debug, Deserialize)]
pub struct ClientState {
    pub call_id: Uuid,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ClientState {
    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Pulls the fields every handler in §4.4 cares about out of the raw JSON
/// payload, tolerating missing fields rather than failing to parse.
pub struct WebhookEvent<'a> {
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
}

impl<'a> WebhookEvent<'a> {
    pub fn new(body: &'a CarrierWebhookBody) -> Self {
        Self {
            event_type: &body.data.event_type,
            payload: &body.data.payload,
        }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(|v| v.as_str())
    }

    pub fn client_state(&self) -> Option<ClientState> {
        self.str_field("client_state").and_then(ClientState::decode)
    }

    pub fn telnyx_call_id(&self) -> Option<&str> {
        self.str_field("call_control_id")
    }

    pub fn leg(&self) -> Option<&str> {
        self.str_field("leg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_state_decodes_base64_json() {
        let call_id = Uuid::new_v4();
        let raw = serde_json::json!({"call_id": call_id, "user_id": "u1"}).to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);

        let state = ClientState::decode(&encoded).unwrap();
        assert_eq!(state.call_id, call_id);
        assert_eq!(state.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn client_state_decode_tolerates_garbage() {
        assert!(ClientState::decode("not base64 at all!!").is_none());
    }

    #[test]
    fn webhook_event_tolerates_missing_fields() {
        let body = CarrierWebhookBody {
            data: CarrierWebhookData {
                event_type: "call.initiated".to_string(),
                payload: serde_json::json!({}),
            },
        };
        let event = WebhookEvent::new(&body);
        assert!(event.client_state().is_none());
        assert!(event.telnyx_call_id().is_none());
        assert!(event.leg().is_none());
    }
}
