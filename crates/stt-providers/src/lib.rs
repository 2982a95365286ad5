//! Meeting audio gate (C2), provider adapters (C3), and the provider
//! availability cache (C7).
//!
//! This crate holds every infrastructure seam that actually talks to an
//! upstream ASR provider or makes a real-time gating decision over raw
//! PCM. `stt-web` wires these concrete types behind the `stt-core` ports
//! its handlers depend on.
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;

pub mod adapters;
pub mod availability;
pub mod gate;
pub mod latency_sink;
pub mod llm;
pub mod tts;

pub use adapters::{
    MockAdapter, RealtimeSessionAdapter, SubprocessAdapter, WebsocketCloudAdapter, WhisperStreamingAdapter,
};
pub use availability::{AlwaysReady, AvailabilityCache, NetworkReadinessProbe, ProviderDescriptor, ReadinessProbe};
pub use gate::{AssistantEchoGuard, GateConfig, GateDecision, MeetingGate};
pub use latency_sink::{JsonlLatencySink, TracingLatencySink};
pub use llm::OpenAiChatProvider;
pub use tts::OpenAiTtsProvider;
