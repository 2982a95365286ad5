//! Server bootstrap — the composition root.
//!
//! This module is the only place infrastructure is wired together: every
//! concrete adapter, the availability cache, the latency sink, and the
//! LLM/TTS providers backing voice mode are constructed here, once, from
//! a single [`ConfigProvider`] snapshot.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use stt_core::config::{ConfigProvider, EnvConfigProvider};
use stt_core::ports::{LatencySink, LlmProvider, TtsProvider};
use stt_providers::availability::{AvailabilityCache, NetworkReadinessProbe, ProviderDescriptor};
use stt_providers::{JsonlLatencySink, OpenAiChatProvider, OpenAiTtsProvider, TracingLatencySink};

use crate::providers::{ProviderEntry, build_registry};

/// CORS configuration for the server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow a fixed set of origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP/WebSocket server.
    pub port: u16,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl ServerConfig {
    /// Default config: port 8787, permissive CORS for local development.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            port: 8787,
            cors: CorsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// Everything a handler needs, built once at startup.
pub struct AppContext {
    pub config: Arc<dyn ConfigProvider>,
    pub registry: Vec<ProviderEntry>,
    pub availability: Arc<AvailabilityCache>,
    pub latency_sink: Arc<dyn LatencySink>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub voice_history_max_turns: usize,
}

fn clone_descriptor(d: &ProviderDescriptor) -> ProviderDescriptor {
    ProviderDescriptor {
        id: d.id.clone(),
        env_key_prefix: d.env_key_prefix.clone(),
        implemented: d.implemented,
        capabilities: d.capabilities,
        ready_url: d.ready_url.clone(),
        handshake_url: d.handshake_url.clone(),
    }
}

/// Compose every service from a `ConfigProvider` snapshot.
///
/// # Errors
///
/// Returns an error if the configured OpenAI chat URL fails its allow-list
/// validation (wrong scheme, host, or path) — a fatal startup error per
/// the environment contract.
pub async fn bootstrap(config: Arc<dyn ConfigProvider>) -> Result<AppContext> {
    let registry = build_registry(config.as_ref());
    let descriptors = registry.iter().map(|e| clone_descriptor(&e.descriptor)).collect();
    let ready_poll_interval = config.get_ms("PROVIDER_READY_POLL_INTERVAL_MS", 1_000);
    let probe = Arc::new(NetworkReadinessProbe::new(ready_poll_interval));
    let availability = Arc::new(AvailabilityCache::new(config.clone(), probe, descriptors));

    let latency_sink: Arc<dyn LatencySink> = match config.get("LATENCY_SINK_PATH") {
        Some(path) => Arc::new(JsonlLatencySink::new(path)),
        None => Arc::new(TracingLatencySink),
    };

    let chat_url = config
        .get("OPENAI_CHAT_URL")
        .unwrap_or("https://api.openai.com/v1/chat/completions")
        .to_string();
    let chat_timeout = config.get_ms("OPENAI_CHAT_TIMEOUT_MS", 60_000);
    let chat_key = config.provider_api_key("OPENAI").unwrap_or_default().to_string();
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiChatProvider::new(
        chat_url,
        chat_key.clone(),
        config.get("OPENAI_CHAT_MODEL").unwrap_or("gpt-4o-mini").to_string(),
        chat_timeout,
    )?);

    let tts_frame_ms = config.get_u32("OPENAI_TTS_FRAME_MS", 40);
    let tts_timeout = config.get_ms("OPENAI_TTS_TIMEOUT_MS", 60_000);
    let tts: Arc<dyn TtsProvider> = Arc::new(OpenAiTtsProvider::new(
        chat_key,
        config.get("OPENAI_TTS_MODEL").unwrap_or("tts-1").to_string(),
        config.get("OPENAI_TTS_VOICE").unwrap_or("alloy").to_string(),
        tts_frame_ms,
        tts_timeout,
    ));

    let voice_history_max_turns = config.get_usize("VOICE_HISTORY_MAX_TURNS", 20);

    Ok(AppContext {
        config,
        registry,
        availability,
        latency_sink,
        llm,
        tts,
        voice_history_max_turns,
    })
}

/// Bootstrap from the process environment and serve until the listener is
/// closed or the process is signalled.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let env_config: Arc<dyn ConfigProvider> = Arc::new(EnvConfigProvider::snapshot());
    let ctx = bootstrap(env_config).await?;
    let app = crate::routes::create_router(Arc::new(ctx), &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("stt-gateway listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
