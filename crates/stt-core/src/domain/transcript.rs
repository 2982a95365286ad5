//! Raw transcripts as produced by provider adapters, before normalization.

use serde::{Deserialize, Serialize};

use crate::domain::options::Channel;

/// One word in a provider's word-level transcript, if it supplies one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A transcript event emitted by a provider adapter, interim or final.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialTranscript {
    pub provider: String,
    pub is_final: bool,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
    /// Wall-clock time the adapter received/produced this event.
    pub timestamp: f64,
    /// Capture timestamp correlated back from the original audio, if the
    /// provider echoes enough to reconstruct it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_capture_ts: Option<f64>,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
}

/// Result of a batch (non-streaming) transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}
