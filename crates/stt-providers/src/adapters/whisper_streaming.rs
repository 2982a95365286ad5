//! Self-hosted streaming whisper provider (§9 design note): kept as its
//! own adapter kind rather than folded into [`super::subprocess`]'s
//! batch-only `whisper-local`, since the two have different wire
//! protocols and different readiness strategies (one is a local binary
//! invocation, the other a long-lived WebSocket to a whisper server).
//!
//! The wire protocol is intentionally minimal compared to
//! [`super::websocket_cloud`]'s Deepgram-shaped query string: a
//! self-hosted whisper streaming server takes `language` and
//! `sample_rate` only, and returns `{text, is_final}` JSON lines.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use stt_core::domain::options::{Channel, StreamingOptions};
use stt_core::domain::transcript::{BatchResult, PartialTranscript};
use stt_core::error::GatewayError;
use stt_core::ports::{AdapterController, AdapterEvent, AudioMeta, ProviderAdapter, ProviderCapabilities};

fn build_url(base_url: &str, opts: &StreamingOptions) -> String {
    format!(
        "{base_url}?language={}&sample_rate={}",
        opts.language, opts.sample_rate
    )
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    text: String,
    #[serde(default)]
    is_final: bool,
}

pub struct WhisperStreamingAdapter {
    id: String,
    base_url: String,
}

impl WhisperStreamingAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
        }
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

struct WhisperStreamingController {
    id: String,
    write: Mutex<WsWrite>,
    closed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl AdapterController for WhisperStreamingController {
    async fn send_audio(&self, pcm: &[u8], _meta: AudioMeta) -> Result<(), GatewayError> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(GatewayError::AdapterClosed {
                provider: self.id.clone(),
                message: "send_audio after close".to_string(),
            });
        }
        self.write
            .lock()
            .await
            .send(Message::Binary(pcm.to_vec().into()))
            .await
            .map_err(|err| GatewayError::AdapterTransport {
                provider: self.id.clone(),
                message: err.to_string(),
            })
    }

    async fn end(&self) -> Result<(), GatewayError> {
        self.write
            .lock()
            .await
            .send(Message::Text("{\"type\":\"end\"}".into()))
            .await
            .map_err(|err| GatewayError::AdapterTransport {
                provider: self.id.clone(),
                message: err.to_string(),
            })
    }

    async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        let mut write = self.write.lock().await;
        let _ = write.close().await;
    }
}

#[async_trait]
impl ProviderAdapter for WhisperStreamingAdapter {
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
        let url = build_url(&self.base_url, opts);
        let (stream, _response) =
            tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|err| GatewayError::AdapterConnect {
                    provider: self.id.clone(),
                    message: err.to_string(),
                })?;
        let (write, mut read) = stream.split();

        let id = self.id.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(parsed) = serde_json::from_str::<UpstreamMessage>(&text) else {
                            continue;
                        };
                        let event = AdapterEvent::Data(PartialTranscript {
                            provider: id.clone(),
                            is_final: parsed.is_final,
                            text: parsed.text,
                            words: None,
                            timestamp: 0.0,
                            origin_capture_ts: None,
                            channel: Channel::Mic,
                            latency_ms: None,
                            speaker_id: None,
                            seq: None,
                        });
                        if events.send(event).await.is_err() {
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

        Ok(Box::new(WhisperStreamingController {
            id: self.id.clone(),
            write: Mutex::new(write),
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    async fn transcribe_file(
        &self,
        _pcm: &[u8],
        _opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError> {
        Err(GatewayError::UnsupportedCapability(
            "whisper-streaming is a streaming-only adapter; use whisper-local for batch".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> StreamingOptions {
        StreamingOptions {
            language: "en-US".to_string(),
            sample_rate: 16_000,
            encoding: "pcm16le".to_string(),
            enable_interim: true,
            enable_diarization: false,
            punctuation_policy: stt_core::domain::options::PunctuationPolicy::Basic,
            dictionary_phrases: Vec::new(),
            context_phrases: Vec::new(),
            enable_vad: false,
            normalize_preset: None,
            parallel: 1,
        }
    }

    #[test]
    fn url_carries_language_and_sample_rate() {
        let url = build_url("ws://127.0.0.1:9000/stream", &opts());
        assert!(url.contains("language=en-US"));
        assert!(url.contains("sample_rate=16000"));
    }

    #[test]
    fn upstream_message_parses_interim_and_final() {
        let msg: UpstreamMessage = serde_json::from_str(r#"{"text":"hi","is_final":true}"#).unwrap();
        assert!(msg.is_final);
        assert_eq!(msg.text, "hi");
    }

    #[tokio::test]
    async fn transcribe_file_is_unsupported() {
        let adapter = WhisperStreamingAdapter::new("whisper-streaming", "ws://127.0.0.1:9000/stream");
        let result = adapter.transcribe_file(&[0u8; 10], &opts()).await;
        assert!(matches!(result, Err(GatewayError::UnsupportedCapability(_))));
    }
}
