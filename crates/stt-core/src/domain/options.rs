//! Per-session streaming configuration, immutable once a session starts.

use serde::{Deserialize, Serialize};

/// Punctuation policy requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunctuationPolicy {
    None,
    Basic,
    Full,
}

impl Default for PunctuationPolicy {
    fn default() -> Self {
        Self::Basic
    }
}

/// Audio channel a transcript originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Mic,
    File,
}

/// Immutable per-session options captured at handshake and never mutated
/// afterward. Mirrors `StreamingConfigMessage` on the wire (see `stt-web`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingOptions {
    /// BCP-47 language tag.
    pub language: String,
    pub sample_rate: u32,
    pub encoding: String,
    #[serde(default)]
    pub enable_interim: bool,
    #[serde(default)]
    pub enable_diarization: bool,
    #[serde(default)]
    pub punctuation_policy: PunctuationPolicy,
    /// Dictionary phrases, capped at 100 by the caller.
    #[serde(default)]
    pub dictionary_phrases: Vec<String>,
    /// Context phrases, capped at 100 by the caller.
    #[serde(default)]
    pub context_phrases: Vec<String>,
    #[serde(default)]
    pub enable_vad: bool,
    pub normalize_preset: Option<String>,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

const fn default_parallel() -> u32 {
    1
}

impl StreamingOptions {
    /// Dictionary/context phrases, trimmed and with empty entries dropped,
    /// as required before joining into a provider query parameter.
    #[must_use]
    pub fn clean_phrases(phrases: &[String]) -> Vec<String> {
        phrases
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}
