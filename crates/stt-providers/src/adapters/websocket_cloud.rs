//! High-throughput cloud ASR provider reached over a persistent WebSocket,
//! with the upstream connection parameters carried entirely in the query
//! string (§4.3).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use stt_core::domain::options::{Channel, StreamingOptions};
use stt_core::domain::transcript::{BatchResult, PartialTranscript, Word};
use stt_core::error::GatewayError;
use stt_core::ports::{AdapterController, AdapterEvent, AudioMeta, ProviderAdapter, ProviderCapabilities};

use super::backoff_delay;

const DEFAULT_ENDPOINTING_MS: u32 = 400;
const MAX_BATCH_ATTEMPTS: u32 = 3;
const BATCH_HARD_CAP: Duration = Duration::from_secs(5 * 60);
const BATCH_IDLE_CAP: Duration = Duration::from_secs(30);

/// BCP-47 tags this provider is known to accept, keyed by primary subtag
/// for fallback (e.g. a request for `en-AU` resolves to `en-US` if the
/// exact regional tag isn't listed).
const SUPPORTED_LANGUAGES: &[&str] = &[
    "en-US", "en-GB", "es-ES", "es-419", "fr-FR", "de-DE", "pt-BR", "ja-JP", "zh-CN", "hi-IN",
];

fn normalize_language(requested: &str) -> Result<String, GatewayError> {
    if SUPPORTED_LANGUAGES.iter().any(|&tag| tag.eq_ignore_ascii_case(requested)) {
        return Ok(requested.to_string());
    }
    let primary = requested.split('-').next().unwrap_or(requested);
    SUPPORTED_LANGUAGES
        .iter()
        .find(|&&tag| tag.split('-').next() == Some(primary))
        .map(|&tag| tag.to_string())
        .ok_or_else(|| GatewayError::InvalidLanguage(requested.to_string()))
}

fn build_url(base_url: &str, api_key: &str, opts: &StreamingOptions) -> Result<String, GatewayError> {
    let language = normalize_language(&opts.language)?;
    let mut query = vec![
        format!("language={language}"),
        format!("sample_rate={}", opts.sample_rate),
        "channels=1".to_string(),
        format!(
            "punctuate={}",
            !matches!(opts.punctuation_policy, stt_core::domain::options::PunctuationPolicy::None)
        ),
        "model=general".to_string(),
    ];

    if opts.enable_interim {
        query.push("interim_results=true".to_string());
    }

    let keywords = StreamingOptions::clean_phrases(&opts.dictionary_phrases);
    if !keywords.is_empty() {
        query.push(format!("keywords={}", keywords.join(",")));
    }
    let context = StreamingOptions::clean_phrases(&opts.context_phrases);
    if !context.is_empty() {
        query.push(format!("context={}", context.join(",")));
    }

    if opts.enable_vad {
        query.push(format!("endpointing={DEFAULT_ENDPOINTING_MS}"));
        query.push("vad_events=true".to_string());
    } else {
        query.push("endpointing=false".to_string());
    }

    Ok(format!("{base_url}?{}&token={api_key}", query.join("&")))
}

#[derive(Debug, Deserialize)]
struct UpstreamWord {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct UpstreamTranscript {
    #[serde(default)]
    is_final: bool,
    text: String,
    #[serde(default)]
    words: Vec<UpstreamWord>,
}

pub struct WebsocketCloudAdapter {
    id: String,
    base_url: String,
    api_key: String,
}

impl WebsocketCloudAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct WebsocketController {
    id: String,
    state: Mutex<ConnState>,
    write: Mutex<futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >>,
    ready: Arc<AtomicBool>,
}

#[async_trait]
impl AdapterController for WebsocketController {
    async fn send_audio(&self, pcm: &[u8], _meta: AudioMeta) -> Result<(), GatewayError> {
        {
            let state = self.state.lock().await;
            if matches!(*state, ConnState::Closing | ConnState::Closed) {
                return Err(GatewayError::AdapterClosed {
                    provider: self.id.clone(),
                    message: "send_audio after close".to_string(),
                });
            }
        }
        // The handshake completed by the time `start_streaming` returned a
        // controller, so `ready` is observational only here, not awaited.
        self.ready.store(true, Ordering::Release);

        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(pcm.to_vec().into()))
            .await
            .map_err(|err| GatewayError::AdapterTransport {
                provider: self.id.clone(),
                message: err.to_string(),
            })
    }

    async fn end(&self) -> Result<(), GatewayError> {
        *self.state.lock().await = ConnState::Closing;
        let mut write = self.write.lock().await;
        write
            .send(Message::Text("{\"type\":\"CloseStream\"}".into()))
            .await
            .map_err(|err| GatewayError::AdapterTransport {
                provider: self.id.clone(),
                message: err.to_string(),
            })
    }

    async fn close(&self) {
        *self.state.lock().await = ConnState::Closed;
        let mut write = self.write.lock().await;
        let _ = write.close().await;
    }
}

#[async_trait]
impl ProviderAdapter for WebsocketCloudAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_batch: true,
            supports_dictionary_phrases: true,
            supports_punctuation_policy: true,
            supports_context_phrases: true,
            supports_diarization: true,
        }
    }

    async fn start_streaming(
        &self,
        opts: &StreamingOptions,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Box<dyn AdapterController>, GatewayError> {
        let url = build_url(&self.base_url, &self.api_key, opts)?;

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
                        let Ok(parsed) = serde_json::from_str::<UpstreamTranscript>(&text) else {
                            continue;
                        };
                        let words = (!parsed.words.is_empty()).then(|| {
                            parsed
                                .words
                                .into_iter()
                                .map(|w| Word {
                                    start: w.start,
                                    end: w.end,
                                    text: w.text,
                                    confidence: w.confidence,
                                })
                                .collect()
                        });
                        let event = AdapterEvent::Data(PartialTranscript {
                            provider: id.clone(),
                            is_final: parsed.is_final,
                            text: parsed.text,
                            words,
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

        Ok(Box::new(WebsocketController {
            id: self.id.clone(),
            state: Mutex::new(ConnState::Open),
            write: Mutex::new(write),
            ready: Arc::new(AtomicBool::new(true)),
        }))
    }

    async fn transcribe_file(
        &self,
        pcm: &[u8],
        opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError> {
        let language = normalize_language(&opts.language)?;
        let client = reqwest::Client::builder()
            .timeout(BATCH_HARD_CAP)
            .build()
            .map_err(|err| GatewayError::Fatal(err.to_string()))?;

        let mut last_err = None;
        for attempt in 0..MAX_BATCH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(
                    attempt - 1,
                    Duration::from_millis(250),
                    BATCH_IDLE_CAP,
                ))
                .await;
            }

            let response = client
                .post(format!("{}/batch?language={language}", self.base_url))
                .header("Content-Type", "audio/pcm")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .body(pcm.to_vec())
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: UpstreamTranscript = resp
                        .json()
                        .await
                        .map_err(|err| GatewayError::Fatal(err.to_string()))?;
                    return Ok(BatchResult {
                        text: parsed.text,
                        words: (!parsed.words.is_empty()).then(|| {
                            parsed
                                .words
                                .into_iter()
                                .map(|w| Word {
                                    start: w.start,
                                    end: w.end,
                                    text: w.text,
                                    confidence: w.confidence,
                                })
                                .collect()
                        }),
                    });
                }
                Ok(resp) if is_retryable_status(resp.status().as_u16()) => {
                    last_err = Some(GatewayError::Retryable(format!("status {}", resp.status())));
                }
                Ok(resp) => {
                    return Err(GatewayError::Fatal(format!(
                        "batch transcription failed with status {}",
                        resp.status()
                    )));
                }
                Err(err) => {
                    last_err = Some(GatewayError::Retryable(err.to_string()));
                }
            }
        }
        Err(last_err.unwrap_or(GatewayError::Fatal("batch transcription exhausted retries".to_string())))
    }
}

const fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(language: &str) -> StreamingOptions {
        StreamingOptions {
            language: language.to_string(),
            sample_rate: 16_000,
            encoding: "pcm16le".to_string(),
            enable_interim: true,
            enable_diarization: false,
            punctuation_policy: stt_core::domain::options::PunctuationPolicy::Basic,
            dictionary_phrases: vec!["foo".to_string(), "  ".to_string(), "bar".to_string()],
            context_phrases: Vec::new(),
            enable_vad: true,
            normalize_preset: None,
            parallel: 1,
        }
    }

    #[test]
    fn exact_language_tag_passes_through() {
        assert_eq!(normalize_language("en-US").unwrap(), "en-US");
    }

    #[test]
    fn unknown_regional_tag_falls_back_to_primary_subtag() {
        assert_eq!(normalize_language("en-AU").unwrap(), "en-US");
    }

    #[test]
    fn fully_unknown_language_is_rejected() {
        assert!(matches!(
            normalize_language("xx-XX"),
            Err(GatewayError::InvalidLanguage(_))
        ));
    }

    #[test]
    fn url_carries_vad_and_keyword_params() {
        let url = build_url("wss://example.test/listen", "secret", &opts("en-US")).unwrap();
        assert!(url.contains("endpointing=400"));
        assert!(url.contains("vad_events=true"));
        assert!(url.contains("keywords=foo,bar"));
        assert!(url.contains("interim_results=true"));
    }

    #[test]
    fn url_disables_endpointing_when_vad_off() {
        let mut o = opts("en-US");
        o.enable_vad = false;
        let url = build_url("wss://example.test/listen", "secret", &o).unwrap();
        assert!(url.contains("endpointing=false"));
        assert!(!url.contains("vad_events"));
    }
}
