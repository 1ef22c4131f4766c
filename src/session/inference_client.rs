//! Per-call session: bridges one carrier media socket to one inference
//! WebSocket, transcoding audio in both directions and persisting
//! transcripts as they complete.

use crate::codec;
use crate::config::AppConfig;
use crate::db::{Call, CallPatch, CallRepo, DbPool, Transcription, TranscriptionRepo};
use crate::error::{AppError, AppResult};
use crate::session::types::{
    CarrierFrame, CarrierOutboundFrame, InferenceErrorDetail, InferenceInboundFrame,
    InferenceOutboundFrame, InputAudioTranscription, SessionUpdatePayload, TurnDetection,
};
use crate::webhook::closing;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

type InferenceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events a session reports out to its owner (the bridge server), standing
/// in for the callback set of a constructor taking closures directly.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transcript { speaker: &'static str, text: String },
    Error(String),
    End,
}

struct SessionInner {
    call_id: Uuid,
    pool: DbPool,
    events: mpsc::UnboundedSender<SessionEvent>,
    inference_write: Mutex<Option<SplitSink<InferenceSocket, Message>>>,
    carrier_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inference_connected: AtomicBool,
    ended: AtomicBool,
}

/// A cheaply cloneable handle to a call's session. Clones share the same
/// underlying sockets and state; cloning is how the reader tasks spawned
/// by `connect_to_inference` hold a reference back into the session.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    pub fn new(call_id: Uuid, pool: DbPool, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self(Arc::new(SessionInner {
            call_id,
            pool,
            events,
            inference_write: Mutex::new(None),
            carrier_tx: Mutex::new(None),
            inference_connected: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }))
    }

    pub fn call_id(&self) -> Uuid {
        self.0.call_id
    }

    /// Opens the inference WebSocket, configures the session, loads the
    /// call context into the agent instructions, and prompts the opening
    /// greeting. Resolves once `session.update` and `response.create` have
    /// both been sent.
    pub async fn connect_to_inference(&self, call_context: Option<&str>) -> AppResult<()> {
        let cfg = &AppConfig::get().inference;
        let url = format!(
            "wss://api.openai.com/v1/realtime?model={}",
            cfg.openai_realtime_model
        );

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::InferenceUnreachable(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", cfg.openai_api_key))
                .map_err(|e| AppError::InferenceUnreachable(e.to_string()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| AppError::InferenceUnreachable("connect timed out".into()))?
            .map_err(|e| AppError::InferenceUnreachable(e.to_string()))?;
        let (write, read) = connected.0.split();

        *self.0.inference_write.lock().await = Some(write);
        self.0.inference_connected.store(true, Ordering::SeqCst);
        info!(call_id = %self.0.call_id, "connected to inference service");

        let reader = self.clone();
        tokio::spawn(async move {
            reader.run_inference_reader(read).await;
        });

        let mut instructions = cfg.voice_agent_instructions.clone();
        if let Some(ctx) = call_context {
            if !ctx.is_empty() {
                instructions.push_str("\n\nCall context:\n");
                instructions.push_str(ctx);
            }
        }

        self.send_inference_frame(InferenceOutboundFrame::SessionUpdate {
            session: SessionUpdatePayload {
                modalities: vec!["text", "audio"],
                instructions,
                voice: cfg.openai_voice.clone(),
                input_audio_format: "pcm16",
                output_audio_format: "pcm16",
                input_audio_transcription: InputAudioTranscription::default(),
                turn_detection: TurnDetection::default(),
            },
        })
        .await?;

        self.send_inference_frame(InferenceOutboundFrame::ResponseCreate)
            .await?;

        Ok(())
    }

    /// Sets the carrier WebSocket's outbound sender. Idempotent: a second
    /// call is a no-op rather than replacing an already-attached socket.
    pub async fn attach_carrier_socket(&self, tx: mpsc::UnboundedSender<Message>) {
        let mut guard = self.0.carrier_tx.lock().await;
        if guard.is_some() {
            debug!(call_id = %self.0.call_id, "carrier socket already attached, ignoring");
            return;
        }
        *guard = Some(tx);
    }

    /// Handles one text frame received from the carrier media WebSocket.
    pub async fn handle_carrier_message(&self, text: &str) {
        let frame: CarrierFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(call_id = %self.0.call_id, error = %e, "unparseable carrier frame");
                return;
            }
        };

        match frame {
            CarrierFrame::Start => info!(call_id = %self.0.call_id, "carrier stream started"),
            CarrierFrame::Stop => {
                info!(call_id = %self.0.call_id, "carrier stream stopped");
                self.cleanup().await;
            }
            CarrierFrame::Media { media } => {
                if !self.0.inference_connected.load(Ordering::SeqCst) {
                    return;
                }
                match codec::carrier_payload_to_inference_audio(&media.payload) {
                    Ok(audio) => {
                        if let Err(e) = self
                            .send_inference_frame(InferenceOutboundFrame::InputAudioBufferAppend {
                                audio,
                            })
                            .await
                        {
                            warn!(call_id = %self.0.call_id, error = %e, "failed to forward audio to inference");
                        }
                    }
                    Err(e) => {
                        warn!(call_id = %self.0.call_id, error = %e, "dropping unreadable carrier media frame");
                    }
                }
            }
        }
    }

    async fn run_inference_reader(&self, mut read: SplitStream<InferenceSocket>) {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<InferenceInboundFrame>(&text) {
                        Ok(frame) => self.handle_inference_message(frame).await,
                        Err(e) => warn!(call_id = %self.0.call_id, error = %e, "unparseable inference frame"),
                    }
                }
                Ok(Message::Close(_)) => {
                    info!(call_id = %self.0.call_id, "inference socket closed");
                    break;
                }
                Err(e) => {
                    error!(call_id = %self.0.call_id, error = %e, "inference socket read error");
                    break;
                }
                _ => {}
            }
        }
        self.cleanup().await;
    }

    /// Handles one event frame received from the inference service.
    pub async fn handle_inference_message(&self, frame: InferenceInboundFrame) {
        match frame {
            InferenceInboundFrame::ResponseAudioDelta { delta } => {
                match codec::inference_audio_to_carrier_payload(&delta) {
                    Ok(payload) => self.send_carrier_media(payload).await,
                    Err(e) => warn!(call_id = %self.0.call_id, error = %e, "dropping unreadable inference audio delta"),
                }
            }
            InferenceInboundFrame::InputAudioTranscriptionCompleted { transcript } => {
                self.persist_and_report(Transcription::SPEAKER_REMOTE, transcript).await;
            }
            InferenceInboundFrame::ResponseAudioTranscriptDone { transcript } => {
                // Mirrors the legacy path's farewell detection: this is the
                // only place the realtime path's agent speech is observed,
                // so it's where `closing_said` must be entered from.
                if closing::is_farewell(&transcript) {
                    self.mark_closing_said().await;
                }
                self.persist_and_report(Transcription::SPEAKER_AGENT, transcript).await;
            }
            InferenceInboundFrame::Error { error: InferenceErrorDetail { message } } => {
                warn!(call_id = %self.0.call_id, %message, "inference service reported an error");
                let _ = self.0.events.send(SessionEvent::Error(message));
            }
            InferenceInboundFrame::SessionCreated
            | InferenceInboundFrame::SessionUpdated
            | InferenceInboundFrame::SpeechStarted
            | InferenceInboundFrame::SpeechStopped
            | InferenceInboundFrame::ResponseDone => {
                debug!(call_id = %self.0.call_id, ?frame, "inference lifecycle event");
            }
            InferenceInboundFrame::Unknown => {}
        }
    }

    async fn mark_closing_said(&self) {
        let patch = CallPatch {
            closing_state: Some(Call::CLOSING_SAID.to_string()),
            closing_started_at: Some(Some(chrono::Utc::now())),
            ..Default::default()
        };
        if let Err(e) = CallRepo::patch(&self.0.pool, self.0.call_id, patch).await {
            warn!(call_id = %self.0.call_id, error = %e, "failed to record closing state");
        }
    }

    async fn persist_and_report(&self, speaker: &'static str, text: String) {
        if text.is_empty() {
            return;
        }
        if let Err(e) =
            TranscriptionRepo::insert(&self.0.pool, self.0.call_id, speaker, &text, None).await
        {
            warn!(call_id = %self.0.call_id, error = %e, "failed to persist transcription");
        }
        let _ = self.0.events.send(SessionEvent::Transcript { speaker, text });
    }

    async fn send_carrier_media(&self, payload: String) {
        let guard = self.0.carrier_tx.lock().await;
        let Some(tx) = guard.as_ref() else { return };
        let frame = CarrierOutboundFrame::outbound_media(payload);
        match serde_json::to_string(&frame) {
            Ok(json) => {
                let _ = tx.send(Message::Text(json.into()));
            }
            Err(e) => warn!(call_id = %self.0.call_id, error = %e, "failed to serialize outbound carrier frame"),
        }
    }

    async fn send_inference_frame(&self, frame: InferenceOutboundFrame) -> AppResult<()> {
        let json = serde_json::to_string(&frame)?;
        let mut guard = self.0.inference_write.lock().await;
        let Some(write) = guard.as_mut() else {
            return Err(AppError::InferenceUnreachable("not connected".into()));
        };
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(AppError::from)
    }

    /// Idempotent teardown: closes both sockets, clears carrier/inference
    /// state, and fires `SessionEvent::End` exactly once.
    pub async fn cleanup(&self) {
        if self.0.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        self.0.inference_connected.store(false, Ordering::SeqCst);

        if let Some(mut write) = self.0.inference_write.lock().await.take() {
            let _ = write.send(Message::Close(None)).await;
        }
        if let Some(tx) = self.0.carrier_tx.lock().await.take() {
            let _ = tx.send(Message::Close(None));
        }

        let _ = self.0.events.send(SessionEvent::End);
        info!(call_id = %self.0.call_id, "session cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> DbPool {
        // Constructed lazily; never connected to in these tests since none
        // of them touch persistence.
        sqlx::Pool::connect_lazy("postgres://localhost/nonexistent").unwrap()
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_fires_end_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(Uuid::new_v4(), test_pool(), tx);

        session.cleanup().await;
        session.cleanup().await;

        let mut end_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::End) {
                end_count += 1;
            }
        }
        assert_eq!(end_count, 1);
    }

    #[tokio::test]
    async fn attach_carrier_socket_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(Uuid::new_v4(), test_pool(), tx);

        let (carrier_tx1, _carrier_rx1) = mpsc::unbounded_channel();
        let (carrier_tx2, mut carrier_rx2) = mpsc::unbounded_channel();
        session.attach_carrier_socket(carrier_tx1).await;
        session.attach_carrier_socket(carrier_tx2).await;

        session.send_carrier_media("payload".to_string()).await;
        assert!(carrier_rx2.try_recv().is_err(), "second attach should have been ignored");
    }

    #[tokio::test]
    async fn carrier_media_dropped_silently_when_inference_not_connected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(Uuid::new_v4(), test_pool(), tx);
        // Should not panic even though no inference socket is attached.
        session
            .handle_carrier_message(r#"{"event":"media","media":{"payload":"//8="}}"#)
            .await;
    }

    #[tokio::test]
    async fn unknown_inference_frames_are_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(Uuid::new_v4(), test_pool(), tx);
        session.handle_inference_message(InferenceInboundFrame::Unknown).await;
        assert!(rx.try_recv().is_err());
    }
}
