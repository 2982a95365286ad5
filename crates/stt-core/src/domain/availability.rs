//! Per-provider availability, as published by the C7 availability cache.

use serde::{Deserialize, Serialize};

/// Snapshot of whether a provider can currently be admitted to a session,
/// and what it supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAvailability {
    pub id: String,
    pub available: bool,
    pub implemented: bool,
    pub supports_streaming: bool,
    pub supports_batch: bool,
    pub supports_dictionary_phrases: bool,
    pub supports_punctuation_policy: bool,
    pub supports_context_phrases: bool,
    pub supports_diarization: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProviderAvailability {
    #[must_use]
    pub fn unavailable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: false,
            implemented: true,
            supports_streaming: false,
            supports_batch: false,
            supports_dictionary_phrases: false,
            supports_punctuation_policy: false,
            supports_context_phrases: false,
            supports_diarization: false,
            reason: Some(reason.into()),
        }
    }
}
