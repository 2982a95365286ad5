//! Port traits: the seams `stt-providers`/`stt-agent`/`stt-web` implement.
//!
//! Kept in `stt-core` so the pure-domain crates (`stt-core`, `stt-agent`)
//! can depend on the *shape* of a provider adapter, an LLM call, a TTS
//! call, or a storage sink without depending on the concrete networking
//! crate that implements it.

use async_trait::async_trait;

use crate::domain::options::StreamingOptions;
use crate::domain::session::LatencySummary;
use crate::domain::transcript::{BatchResult, PartialTranscript};
use crate::domain::turn::HistoryMessage;
use crate::error::GatewayError;

/// Metadata carried alongside one audio chunk sent to an adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioMeta {
    pub capture_ts: f64,
    pub seq: u32,
}

/// What a provider adapter declares it can do — feeds C7's availability
/// cache and C5's admission control.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_batch: bool,
    pub supports_dictionary_phrases: bool,
    pub supports_punctuation_policy: bool,
    pub supports_context_phrases: bool,
    pub supports_diarization: bool,
}

/// Events an adapter controller's `onData`/`onError`/`onClose`
/// subscribers receive, collapsed into one enum so the fan-out channel
/// (§9: event-emitter subscription reworked as an explicit pub-sub) has a
/// single message type to carry.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Data(PartialTranscript),
    Error(GatewayError),
    Closed,
}

/// Per-streaming-session handle returned by
/// [`ProviderAdapter::start_streaming`]. All methods are safe to call from
/// any state; `close()` in particular is idempotent and non-throwing
/// (§5 cancellation semantics).
#[async_trait]
pub trait AdapterController: Send + Sync {
    /// Send one PCM chunk upstream. The first call may block until the
    /// upstream handshake completes (state `Connecting`); calling after
    /// `end()` is a programmer error, and implementations should treat it
    /// as `AdapterClosed`.
    async fn send_audio(&self, pcm: &[u8], meta: AudioMeta) -> Result<(), GatewayError>;

    /// Politely signal end-of-audio upstream. Further `send_audio` calls
    /// fail afterward.
    async fn end(&self) -> Result<(), GatewayError>;

    /// Abort immediately. Safe to call repeatedly and from any state.
    async fn close(&self);
}

/// Uniform streaming/batch contract over one upstream ASR provider (C3).
/// Every adapter variant — websocket cloud, realtime session, local
/// subprocess, mock — implements this trait identically from the
/// `CompareSession`'s point of view; only construction differs.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier (`"deepgram"`, `"realtime"`, `"whisper-local"`,
    /// `"mock"`, …) used in `NormalizedEvent.provider` and availability
    /// reporting.
    fn id(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Establish the upstream connection and start forwarding transcript
    /// events to `events`. Returns `UnsupportedCapability` for adapters
    /// that are batch-only.
    async fn start_streaming(
        &self,
        opts: &StreamingOptions,
        events: tokio::sync::mpsc::Sender<AdapterEvent>,
    ) -> Result<Box<dyn AdapterController>, GatewayError>;

    /// Buffer the full PCM stream and POST it to the provider in one
    /// batch call, with bounded retry on transient failures.
    async fn transcribe_file(
        &self,
        pcm: &[u8],
        opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError>;
}

/// One LLM turn: given the full history plus the new user message,
/// produce the assistant's reply text. Cancellation-aware per §5/§4.6.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        history: &[HistoryMessage],
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<String, GatewayError>;
}

/// Stats reported once a TTS synthesis completes, used by C6 to emit
/// `voice_assistant_audio_start{llmMs, ttsTtfbMs}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtsStats {
    pub ttfb_ms: f64,
}

/// Streams synthesized PCM chunks to `audio_tx` in generation order as
/// they become available (§9: generator-based TTS streaming reworked as a
/// producer task over a bounded channel). Returns once the stream ends or
/// `cancel` fires.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        cancel: &tokio_util::sync::CancellationToken,
        audio_tx: tokio::sync::mpsc::Sender<Vec<u8>>,
    ) -> Result<TtsStats, GatewayError>;
}

/// Append-only sink for per-session latency summaries. Treated as a
/// write-only collaborator per §1 (storage drivers are out of scope); the
/// core only needs this shape to call it on session teardown.
#[async_trait]
pub trait LatencySink: Send + Sync {
    async fn record(&self, session_id: &str, summary: LatencySummary) -> Result<(), GatewayError>;
}
