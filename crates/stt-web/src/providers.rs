//! Provider registry (§4.7/§4.3 composition): turns a
//! [`ConfigProvider`] snapshot into the set of adapters a session may
//! admit, plus the matching descriptors the availability cache probes.
//!
//! This is the one place that decides which adapter ids exist at all —
//! `deepgram` (websocket cloud) and `realtime` (realtime session) are
//! always registered; `whisper-local` (local subprocess, batch-only) and
//! `whisper-streaming` (self-hosted whisper WebSocket, streaming-only)
//! are two distinct adapter kinds wired only when their binary path or
//! WebSocket URL is configured, per §9's note not to merge them; `mock`
//! is always present as a safe fallback for tests and local development.

use std::sync::Arc;

use stt_core::config::ConfigProvider;
use stt_core::ports::{ProviderAdapter, ProviderCapabilities};
use stt_providers::availability::ProviderDescriptor;
use stt_providers::{
    MockAdapter, RealtimeSessionAdapter, SubprocessAdapter, WebsocketCloudAdapter, WhisperStreamingAdapter,
};

/// One entry in the registry: the adapter instance plus the descriptor
/// the availability cache uses to report on it.
pub struct ProviderEntry {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub descriptor: ProviderDescriptor,
}

/// Build every provider entry the process can offer, reading secrets and
/// endpoints once from `config`. Adapters without a configured secret are
/// still registered (so their `unavailable` reason surfaces through C7)
/// except the two local/self-hosted whisper variants, which only appear
/// once their binary path or WebSocket URL is configured — there is no
/// "missing key" story for a local process or a self-hosted server.
#[must_use]
pub fn build_registry(config: &dyn ConfigProvider) -> Vec<ProviderEntry> {
    let mut entries = Vec::new();

    let deepgram_base = config
        .get("DEEPGRAM_WS_URL")
        .unwrap_or("wss://api.deepgram.com/v1/listen")
        .to_string();
    let deepgram_key = config.provider_api_key("DEEPGRAM").unwrap_or_default().to_string();
    entries.push(ProviderEntry {
        adapter: Arc::new(WebsocketCloudAdapter::new("deepgram", deepgram_base.clone(), deepgram_key)),
        descriptor: ProviderDescriptor {
            id: "deepgram".to_string(),
            env_key_prefix: "DEEPGRAM".to_string(),
            implemented: true,
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                supports_batch: true,
                supports_dictionary_phrases: true,
                supports_punctuation_policy: true,
                supports_context_phrases: true,
                supports_diarization: false,
            },
            ready_url: None,
            handshake_url: Some(deepgram_base),
        },
    });

    let realtime_base = config
        .get("REALTIME_WS_URL")
        .unwrap_or("wss://api.openai.com/v1/realtime")
        .to_string();
    let realtime_key = config.provider_api_key("REALTIME").unwrap_or_default().to_string();
    entries.push(ProviderEntry {
        adapter: Arc::new(RealtimeSessionAdapter::new("realtime", realtime_base.clone(), realtime_key)),
        descriptor: ProviderDescriptor {
            id: "realtime".to_string(),
            env_key_prefix: "REALTIME".to_string(),
            implemented: true,
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                supports_batch: false,
                supports_dictionary_phrases: false,
                supports_punctuation_policy: false,
                supports_context_phrases: false,
                supports_diarization: false,
            },
            ready_url: None,
            handshake_url: Some(realtime_base),
        },
    });

    if let Some(binary_path) = config.get("WHISPER_LOCAL_BINARY_PATH") {
        entries.push(ProviderEntry {
            adapter: Arc::new(SubprocessAdapter::new("whisper-local", binary_path, Vec::new())),
            descriptor: ProviderDescriptor {
                id: "whisper-local".to_string(),
                env_key_prefix: "WHISPER_LOCAL".to_string(),
                implemented: true,
                capabilities: ProviderCapabilities {
                    supports_streaming: false,
                    supports_batch: true,
                    supports_dictionary_phrases: false,
                    supports_punctuation_policy: false,
                    supports_context_phrases: false,
                    supports_diarization: false,
                },
                ready_url: None,
                handshake_url: None,
            },
        });
    }

    if let Some(whisper_ws_url) = config.get("WHISPER_WS_URL") {
        entries.push(ProviderEntry {
            adapter: Arc::new(WhisperStreamingAdapter::new("whisper-streaming", whisper_ws_url.to_string())),
            descriptor: ProviderDescriptor {
                id: "whisper-streaming".to_string(),
                env_key_prefix: "WHISPER_STREAMING".to_string(),
                implemented: true,
                capabilities: ProviderCapabilities {
                    supports_streaming: true,
                    supports_batch: false,
                    supports_dictionary_phrases: false,
                    supports_punctuation_policy: false,
                    supports_context_phrases: false,
                    supports_diarization: false,
                },
                ready_url: config.get("WHISPER_STREAMING_READY_URL").map(ToString::to_string),
                handshake_url: None,
            },
        });
    }

    entries.push(ProviderEntry {
        adapter: Arc::new(MockAdapter::new("mock")),
        descriptor: ProviderDescriptor {
            id: "mock".to_string(),
            env_key_prefix: "MOCK".to_string(),
            implemented: true,
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                supports_batch: true,
                supports_dictionary_phrases: true,
                supports_punctuation_policy: true,
                supports_context_phrases: true,
                supports_diarization: true,
            },
            ready_url: None,
            handshake_url: None,
        },
    });

    entries
}

/// Look up one adapter by id among a registry snapshot.
#[must_use]
pub fn find_adapter(entries: &[ProviderEntry], id: &str) -> Option<Arc<dyn ProviderAdapter>> {
    entries.iter().find(|e| e.descriptor.id == id).map(|e| e.adapter.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stt_core::config::EnvConfigProvider;

    #[test]
    fn mock_is_always_registered() {
        let config = EnvConfigProvider::from_map(HashMap::new());
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "mock").is_some());
    }

    #[test]
    fn whisper_local_only_registered_with_binary_path() {
        let config = EnvConfigProvider::from_map(HashMap::new());
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "whisper-local").is_none());

        let mut map = HashMap::new();
        map.insert("WHISPER_LOCAL_BINARY_PATH".to_string(), "/usr/local/bin/whisper".to_string());
        let config = EnvConfigProvider::from_map(map);
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "whisper-local").is_some());
    }

    #[test]
    fn deepgram_and_realtime_are_always_registered() {
        let config = EnvConfigProvider::from_map(HashMap::new());
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "deepgram").is_some());
        assert!(find_adapter(&registry, "realtime").is_some());
    }

    #[test]
    fn whisper_streaming_only_registered_with_ws_url() {
        let config = EnvConfigProvider::from_map(HashMap::new());
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "whisper-streaming").is_none());

        let mut map = HashMap::new();
        map.insert("WHISPER_WS_URL".to_string(), "ws://127.0.0.1:9000/stream".to_string());
        let config = EnvConfigProvider::from_map(map);
        let registry = build_registry(&config);
        assert!(find_adapter(&registry, "whisper-streaming").is_some());
    }

    #[test]
    fn whisper_local_and_whisper_streaming_are_distinct_kinds() {
        let mut map = HashMap::new();
        map.insert("WHISPER_LOCAL_BINARY_PATH".to_string(), "/usr/local/bin/whisper".to_string());
        map.insert("WHISPER_WS_URL".to_string(), "ws://127.0.0.1:9000/stream".to_string());
        let config = EnvConfigProvider::from_map(map);
        let registry = build_registry(&config);

        let local = registry.iter().find(|e| e.descriptor.id == "whisper-local").unwrap();
        let streaming = registry.iter().find(|e| e.descriptor.id == "whisper-streaming").unwrap();
        assert!(local.descriptor.capabilities.supports_batch);
        assert!(!local.descriptor.capabilities.supports_streaming);
        assert!(streaming.descriptor.capabilities.supports_streaming);
        assert!(!streaming.descriptor.capabilities.supports_batch);
    }
}
