//! Wire types for the carrier media WebSocket and the inference WebSocket.

use serde::{Deserialize, Serialize};

/// Carrier media-stream frame, incoming direction.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierFrame {
    Start,
    Media { media: CarrierMediaPayload },
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarrierMediaPayload {
    pub payload: String,
}

/// Carrier media-stream frame, outgoing direction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierOutboundFrame {
    Media { media: CarrierOutboundMedia },
}

#[derive(Debug, Clone, Serialize)]
pub struct CarrierOutboundMedia {
    pub track: &'static str,
    pub payload: String,
}

impl CarrierOutboundFrame {
    pub fn outbound_media(payload: String) -> Self {
        Self::Media {
            media: CarrierOutboundMedia {
                track: "outbound",
                payload,
            },
        }
    }
}

/// Server-side voice activity detection, per the fixed thresholds the
/// session always configures.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad",
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: &'static str,
}

impl Default for InputAudioTranscription {
    fn default() -> Self {
        Self { model: "whisper-1" }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdatePayload {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: TurnDetection,
}

/// Control frames sent to the inference service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InferenceOutboundFrame {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdatePayload },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

/// Event frames received from the inference service. Unrecognized `type`
/// values deserialize into `Unknown` rather than failing the parse, since
/// the protocol is expected to grow new event types over time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InferenceInboundFrame {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: InferenceErrorDetail },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceErrorDetail {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_start_frame_parses() {
        let frame: CarrierFrame = serde_json::from_str(r#"{"event":"start"}"#).unwrap();
        assert!(matches!(frame, CarrierFrame::Start));
    }

    #[test]
    fn carrier_media_frame_parses_payload() {
        let frame: CarrierFrame =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"//8="}}"#).unwrap();
        match frame {
            CarrierFrame::Media { media } => assert_eq!(media.payload, "//8="),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn outbound_media_frame_serializes_track_and_payload() {
        let frame = CarrierOutboundFrame::outbound_media("abc".to_string());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["media"]["track"], "outbound");
        assert_eq!(json["media"]["payload"], "abc");
    }

    #[test]
    fn session_update_serializes_expected_shape() {
        let frame = InferenceOutboundFrame::SessionUpdate {
            session: SessionUpdatePayload {
                modalities: vec!["text", "audio"],
                instructions: "be helpful".to_string(),
                voice: "alloy".to_string(),
                input_audio_format: "pcm16",
                output_audio_format: "pcm16",
                input_audio_transcription: InputAudioTranscription::default(),
                turn_detection: TurnDetection::default(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["turn_detection"]["threshold"], 0.5);
        assert_eq!(json["session"]["modalities"][0], "text");
    }

    #[test]
    fn unknown_inference_event_type_does_not_fail_parse() {
        let frame: InferenceInboundFrame =
            serde_json::from_str(r#"{"type":"some_future_event"}"#).unwrap();
        assert!(matches!(frame, InferenceInboundFrame::Unknown));
    }

    #[test]
    fn error_frame_carries_message() {
        let frame: InferenceInboundFrame =
            serde_json::from_str(r#"{"type":"error","error":{"message":"boom"}}"#).unwrap();
        match frame {
            InferenceInboundFrame::Error { error } => assert_eq!(error.message, "boom"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
