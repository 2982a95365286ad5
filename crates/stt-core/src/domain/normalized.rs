//! Output of the stream normalizer (C4): one unified, time-bucketed view
//! of a provider's transcript stream.

use serde::{Deserialize, Serialize};

/// A normalized, time-windowed transcript event. `normalized_id` is
/// `sessionId:provider:windowId:revision` and uniquely identifies this
/// published revision within the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub normalized_id: String,
    pub session_id: String,
    pub provider: String,
    pub window_id: i64,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub text_raw: String,
    pub text_norm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_delta: Option<String>,
    pub is_final: bool,
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub punctuation_applied: bool,
    pub casing_applied: bool,
}

impl NormalizedEvent {
    #[must_use]
    pub fn normalized_id(session_id: &str, provider: &str, window_id: i64, revision: u32) -> String {
        format!("{session_id}:{provider}:{window_id}:{revision}")
    }
}

/// Per-`(windowId, provider)` state the normalizer tracks internally.
///
/// Invariant: `revision` is strictly increasing; once `is_final` is set,
/// no interim update mutates `text_norm`/`text_raw` — only a later final
/// may supersede, and only with `revision + 1`.
#[derive(Debug, Clone, Default)]
pub struct WindowState {
    pub revision: u32,
    pub is_final: bool,
    pub text_raw: String,
    pub text_norm: String,
}
