//! Realtime bidirectional session provider: a single persistent WebSocket
//! fixed at 24 kHz, audio framed as base64 inside JSON control messages
//! rather than raw binary frames (§4.3).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use stt_core::domain::options::{Channel, StreamingOptions};
use stt_core::domain::transcript::{BatchResult, PartialTranscript};
use stt_core::error::GatewayError;
use stt_core::ports::{AdapterController, AdapterEvent, AudioMeta, ProviderAdapter, ProviderCapabilities};

const SAMPLE_RATE: u32 = 24_000;
/// Provider rejects a commit covering less audio than this; buffered tails
/// shorter than the minimum are padded with silence rather than dropped.
const MIN_COMMIT_MS: u64 = 100;
const BYTES_PER_MS: u64 = (SAMPLE_RATE as u64 * 2) / 1000; // 16-bit mono PCM

fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientMessage<'a> {
    #[serde(rename = "transcription_session.update")]
    SessionUpdate {
        input_audio_format: &'a str,
        input_audio_sample_rate: u32,
        input_audio_transcription: TranscriptionConfig<'a>,
    },
    #[serde(rename = "input_audio_buffer.append")]
    BufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    BufferCommit,
}

#[derive(Serialize)]
struct TranscriptionConfig<'a> {
    language: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    Delta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    Completed { transcript: String },
    #[serde(other)]
    Other,
}

pub struct RealtimeSessionAdapter {
    id: String,
    base_url: String,
    api_key: String,
}

impl RealtimeSessionAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

struct RealtimeController {
    id: String,
    write: Mutex<WsWrite>,
    buffered_bytes: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl RealtimeController {
    async fn send_json(&self, msg: &ClientMessage<'_>) -> Result<(), GatewayError> {
        let body = serde_json::to_string(msg).map_err(|err| GatewayError::Fatal(err.to_string()))?;
        self.write
            .lock()
            .await
            .send(Message::Text(body.into()))
            .await
            .map_err(|err| GatewayError::AdapterTransport {
                provider: self.id.clone(),
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl AdapterController for RealtimeController {
    async fn send_audio(&self, pcm: &[u8], _meta: AudioMeta) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::AdapterClosed {
                provider: self.id.clone(),
                message: "send_audio after close".to_string(),
            });
        }
        self.buffered_bytes
            .fetch_add(pcm.len() as u64, Ordering::Relaxed);
        let encoded = BASE64.encode(pcm);
        self.send_json(&ClientMessage::BufferAppend { audio: encoded }).await
    }

    async fn end(&self) -> Result<(), GatewayError> {
        let buffered = self.buffered_bytes.swap(0, Ordering::AcqRel);
        let min_bytes = MIN_COMMIT_MS * BYTES_PER_MS;
        if buffered > 0 && buffered < min_bytes {
            let padding = vec![0u8; usize::try_from(min_bytes - buffered).unwrap_or(0)];
            let encoded = BASE64.encode(&padding);
            self.send_json(&ClientMessage::BufferAppend { audio: encoded }).await?;
        }
        self.send_json(&ClientMessage::BufferCommit).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut write = self.write.lock().await;
        let _ = write.close().await;
    }
}

#[async_trait]
impl ProviderAdapter for RealtimeSessionAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_batch: false,
            supports_dictionary_phrases: false,
            supports_punctuation_policy: false,
            supports_context_phrases: false,
            supports_diarization: false,
        }
    }

    async fn start_streaming(
        &self,
        opts: &StreamingOptions,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Box<dyn AdapterController>, GatewayError> {
        let url = format!("{}?token={}", self.base_url, self.api_key);
        let (stream, _response) =
            tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|err| GatewayError::AdapterConnect {
                    provider: self.id.clone(),
                    message: err.to_string(),
                })?;
        let (mut write, mut read) = stream.split();

        let language = primary_subtag(&opts.language).to_string();
        let update = ClientMessage::SessionUpdate {
            input_audio_format: "pcm16",
            input_audio_sample_rate: SAMPLE_RATE,
            input_audio_transcription: TranscriptionConfig { language: &language },
        };
        let body = serde_json::to_string(&update).map_err(|err| GatewayError::Fatal(err.to_string()))?;
        write
            .send(Message::Text(body.into()))
            .await
            .map_err(|err| GatewayError::AdapterConnect {
                provider: self.id.clone(),
                message: err.to_string(),
            })?;

        let id = self.id.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(parsed) = serde_json::from_str::<ServerMessage>(&text) else {
                            continue;
                        };
                        let event = match parsed {
                            ServerMessage::Delta { delta } => Some(partial(&id, delta, false)),
                            ServerMessage::Completed { transcript } => Some(partial(&id, transcript, true)),
                            ServerMessage::Other => None,
                        };
                        if let Some(event) = event
                            && events.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = events.send(AdapterEvent::Closed).await;
                        break;
                    }
                    Err(err) => {
                        let _ = events
                            .send(AdapterEvent::Error(GatewayError::AdapterTransport {
                                provider: id.clone(),
                                message: err.to_string(),
                            }))
                            .await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Box::new(RealtimeController {
            id: self.id.clone(),
            write: Mutex::new(write),
            buffered_bytes: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    async fn transcribe_file(
        &self,
        _pcm: &[u8],
        _opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError> {
        Err(GatewayError::UnsupportedCapability(
            "realtime session provider is streaming-only".to_string(),
        ))
    }
}

fn partial(provider: &str, text: String, is_final: bool) -> AdapterEvent {
    AdapterEvent::Data(PartialTranscript {
        provider: provider.to_string(),
        is_final,
        text,
        words: None,
        timestamp: 0.0,
        origin_capture_ts: None,
        channel: Channel::Mic,
        latency_ms: None,
        speaker_id: None,
        seq: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_subtag_strips_region() {
        assert_eq!(primary_subtag("en-US"), "en");
        assert_eq!(primary_subtag("fr"), "fr");
    }

    #[test]
    fn session_update_serializes_with_tag() {
        let update = ClientMessage::SessionUpdate {
            input_audio_format: "pcm16",
            input_audio_sample_rate: SAMPLE_RATE,
            input_audio_transcription: TranscriptionConfig { language: "en" },
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"type\":\"transcription_session.update\""));
        assert!(json.contains("\"input_audio_sample_rate\":24000"));
    }

    #[test]
    fn server_delta_message_parses() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"hel"}"#)
                .unwrap();
        assert!(matches!(msg, ServerMessage::Delta { delta } if delta == "hel"));
    }

    #[test]
    fn unknown_server_message_falls_back_to_other() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"session.created"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Other));
    }
}
