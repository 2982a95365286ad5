//! JSON wire messages exchanged on the two client-facing WebSocket
//! endpoints. Binary frames carry audio (decoded on the way in, raw TTS
//! PCM on the way out); every other exchange is one of these typed JSON
//! messages.
//!
//! Both config messages use `deny_unknown_fields` — the first message
//! after connect is validated against a strict schema and any unknown
//! field is a `ProtocolError`.

use serde::{Deserialize, Serialize};

use stt_core::domain::options::PunctuationPolicy;

/// `options` sub-object of the compare-mode `config` message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CompareOptions {
    #[serde(default)]
    pub enable_vad: bool,
    #[serde(default)]
    pub punctuation_policy: Option<PunctuationPolicy>,
    #[serde(default)]
    pub dictionary_phrases: Vec<String>,
    #[serde(default)]
    pub parallel: Option<u32>,
    #[serde(default)]
    pub meeting_mode: bool,
    #[serde(default)]
    pub enable_channel_split: bool,
    #[serde(default)]
    pub enable_diarization: bool,
}

/// First message on `/ws/compare`. Unknown fields are rejected —
/// `clientSampleRate` is mandatory whenever `pcm = true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CompareConfigMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enable_interim: bool,
    #[serde(default)]
    pub context_phrases: Vec<String>,
    #[serde(default)]
    pub normalize_preset: Option<String>,
    #[serde(default)]
    pub pcm: bool,
    #[serde(default)]
    pub degraded: bool,
    pub client_sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub channel_split: bool,
    #[serde(default)]
    pub options: CompareOptions,
    /// Providers to fan audio out to. Not part of the distilled spec's
    /// wire grammar verbatim, but §4.5 step 2 requires the session to
    /// know which providers were admitted — this is how the client
    /// requests them.
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    pub language: Option<String>,
}

fn default_providers() -> Vec<String> {
    vec!["mock".to_string()]
}

/// `options` sub-object of the voice-mode `config` message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VoiceOptions {
    #[serde(default)]
    pub finalize_delay_ms: Option<u64>,
    #[serde(default)]
    pub meeting_mode: bool,
    #[serde(default)]
    pub meeting_require_wake_word: bool,
    #[serde(default)]
    pub wake_words: Vec<String>,
}

/// First message on `/ws/voice` (§6). `pcm` must be `true`;
/// `clientSampleRate` is always required here.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VoiceConfigMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub pcm: bool,
    pub client_sample_rate: u32,
    #[serde(default)]
    pub enable_interim: bool,
    #[serde(default)]
    pub options: VoiceOptions,
    pub provider: Option<String>,
    pub language: Option<String>,
}

/// Client→server command frame, valid after either config message.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CommandMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub played_ms: Option<f64>,
}

/// Server→client messages for compare mode (§6). `Transcript` carries the
/// adapter's raw `PartialTranscript` tagged with its own `type`;
/// `Normalized` carries C4's output the same way.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompareServerMessage {
    #[serde(rename_all = "camelCase")]
    Session {
        session_id: String,
        provider: Vec<String>,
        started_at: f64,
        audio_spec: stt_core::domain::options::StreamingOptions,
    },
    #[serde(rename_all = "camelCase")]
    Transcript {
        #[serde(flatten)]
        transcript: stt_core::domain::transcript::PartialTranscript,
        degraded: bool,
    },
    #[serde(rename_all = "camelCase")]
    Normalized {
        #[serde(flatten)]
        normalized: stt_core::domain::normalized::NormalizedEvent,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        provider: Option<String>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionEnd {
        session_id: String,
        summary: Option<stt_core::domain::session::LatencySummary>,
    },
}

/// The voice-mode analogue of `Session` — not part of `stt_agent::VoiceEvent`
/// since it is emitted once at connect, before any turn exists.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceServerMessage {
    #[serde(rename_all = "camelCase")]
    VoiceSession {
        session_id: String,
        provider: String,
        started_at: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_config_rejects_unknown_fields() {
        let json = r#"{"type":"config","pcm":true,"clientSampleRate":16000,"bogus":1}"#;
        let result: Result<CompareConfigMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn compare_config_parses_minimal_message() {
        let json = r#"{"type":"config"}"#;
        let parsed: CompareConfigMessage = serde_json::from_str(json).unwrap();
        assert!(!parsed.pcm);
        assert_eq!(parsed.providers, vec!["mock".to_string()]);
    }

    #[test]
    fn voice_config_requires_known_shape() {
        let json = r#"{"type":"config","pcm":true,"clientSampleRate":16000}"#;
        let parsed: VoiceConfigMessage = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.client_sample_rate, 16000);
    }

    #[test]
    fn command_message_parses_barge_in() {
        let json = r#"{"type":"command","name":"barge_in"}"#;
        let parsed: CommandMessage = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.name, "barge_in");
    }
}
