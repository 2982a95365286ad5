//! Provider availability cache (C7): background health probe of providers
//! with TTL caching, feeding admission control in `CompareSession`.
//!
//! Per-provider availability is the conjunction of the checks in §4.7:
//! implemented, secret present, readiness endpoint (if any) reachable,
//! and/or handshake (if any) succeeding. Failures never throw to callers
//! — they are stored as `available = false` with a human-readable reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};

use stt_core::config::ConfigProvider;
use stt_core::domain::availability::ProviderAvailability;
use stt_core::ports::ProviderCapabilities;

/// One provider's static description plus however its readiness is
/// checked — a readiness HTTP probe, a WebSocket handshake probe, or
/// neither (secret presence alone is sufficient, e.g. a subprocess
/// adapter).
pub struct ProviderDescriptor {
    pub id: String,
    pub env_key_prefix: String,
    pub implemented: bool,
    pub capabilities: ProviderCapabilities,
    /// Resolved readiness-endpoint URL (already read from its env var by
    /// the registry), polled with HTTP GET every `ready_interval`.
    pub ready_url: Option<String>,
    /// Resolved WebSocket URL to open a short-lived handshake against.
    pub handshake_url: Option<String>,
}

/// How to probe a provider's readiness, injected so the cache's polling
/// logic stays decoupled from `reqwest`/`tokio-tungstenite` specifics
/// (those live in the adapters themselves, which is where the actual
/// handshake code is grounded).
#[async_trait::async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `true` if the provider's readiness endpoint/handshake succeeds
    /// within the caller-supplied timeout. Never returns an `Err` for a
    /// failed probe — only for truly exceptional conditions the caller
    /// should log and treat as "not ready".
    async fn probe(&self, descriptor: &ProviderDescriptor, timeout: Duration) -> bool;
}

/// A `ReadinessProbe` that always reports ready — used for descriptors
/// with no `ready_url`/`handshake_url` requirement, and in tests.
pub struct AlwaysReady;

#[async_trait::async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn probe(&self, _descriptor: &ProviderDescriptor, _timeout: Duration) -> bool {
        true
    }
}

/// Production readiness probe (§4.7): HTTP GET against `ready_url`,
/// polled every `poll_interval` until it succeeds (status < 500) or
/// `timeout` elapses; otherwise, if `handshake_url` is set, a short-lived
/// WebSocket open within 5s. A descriptor with neither is considered
/// ready once its secret is present (the caller only reaches this probe
/// after that check already passed).
pub struct NetworkReadinessProbe {
    client: reqwest::Client,
    poll_interval: Duration,
}

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

impl NetworkReadinessProbe {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            poll_interval,
        }
    }

    async fn poll_ready_url(&self, url: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(resp) = self.client.get(url).send().await
                && resp.status().as_u16() < 500
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }

    async fn handshake(url: &str) -> bool {
        tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for NetworkReadinessProbe {
    async fn probe(&self, descriptor: &ProviderDescriptor, timeout: Duration) -> bool {
        if let Some(url) = &descriptor.ready_url {
            return self.poll_ready_url(url, timeout).await;
        }
        if let Some(url) = &descriptor.handshake_url {
            return Self::handshake(url).await;
        }
        true
    }
}

struct CacheEntry {
    computed_at: Instant,
    value: ProviderAvailability,
}

/// TTL-cached, in-flight-deduplicated availability lookup across all
/// configured providers.
pub struct AvailabilityCache {
    config: Arc<dyn ConfigProvider>,
    probe: Arc<dyn ReadinessProbe>,
    descriptors: Vec<ProviderDescriptor>,
    ttl: Duration,
    ready_timeout: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Caps concurrent in-flight probes per provider id to one, so
    /// concurrent callers within the TTL window share a single computation
    /// rather than stampeding the provider.
    in_flight: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl AvailabilityCache {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        probe: Arc<dyn ReadinessProbe>,
        descriptors: Vec<ProviderDescriptor>,
    ) -> Self {
        let ttl = config.get_ms("PROVIDER_AVAILABILITY_REFRESH_MS", 5_000);
        let ready_timeout = config.get_ms("WHISPER_STREAMING_READY_TIMEOUT_MS", 90_000);
        Self {
            config,
            probe,
            descriptors,
            ttl,
            ready_timeout,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Invalidate all cached entries — called on config replacement.
    pub async fn invalidate(&self) {
        self.entries.lock().await.clear();
    }

    /// Snapshot of every configured provider's current availability.
    pub async fn list(&self, force: bool) -> Vec<ProviderAvailability> {
        let mut out = Vec::with_capacity(self.descriptors.len());
        for d in &self.descriptors {
            out.push(self.get(&d.id, force).await);
        }
        out
    }

    /// `get(force?)`: returns cached within TTL; otherwise computes once
    /// and de-duplicates concurrent callers via a per-provider semaphore.
    pub async fn get(&self, provider_id: &str, force: bool) -> ProviderAvailability {
        if !force && let Some(cached) = self.cached_if_fresh(provider_id).await {
            return cached;
        }

        let sem = {
            let mut guard = self.in_flight.lock().await;
            guard
                .entry(provider_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        let _permit = sem.acquire().await.expect("semaphore never closed");

        // Re-check after acquiring the permit: another caller may have
        // just finished the computation while we were waiting.
        if !force && let Some(cached) = self.cached_if_fresh(provider_id).await {
            return cached;
        }

        let value = self.compute(provider_id).await;
        self.entries.lock().await.insert(
            provider_id.to_string(),
            CacheEntry {
                computed_at: Instant::now(),
                value: value.clone(),
            },
        );
        value
    }

    async fn cached_if_fresh(&self, provider_id: &str) -> Option<ProviderAvailability> {
        let entries = self.entries.lock().await;
        entries.get(provider_id).and_then(|e| {
            if e.computed_at.elapsed() < self.ttl {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    async fn compute(&self, provider_id: &str) -> ProviderAvailability {
        let Some(descriptor) = self.descriptors.iter().find(|d| d.id == provider_id) else {
            return ProviderAvailability::unavailable(provider_id, "unknown provider");
        };

        if !descriptor.implemented {
            return ProviderAvailability::unavailable(provider_id, "adapter not implemented");
        }

        if self
            .config
            .provider_api_key(&descriptor.env_key_prefix)
            .is_none()
        {
            return ProviderAvailability::unavailable(
                provider_id,
                format!("missing {}_API_KEY", descriptor.env_key_prefix),
            );
        }

        if (descriptor.ready_url.is_some() || descriptor.handshake_url.is_some())
            && !self.probe.probe(descriptor, self.ready_timeout).await
        {
            return ProviderAvailability::unavailable(provider_id, "readiness probe failed");
        }

        ProviderAvailability {
            id: provider_id.to_string(),
            available: true,
            implemented: true,
            supports_streaming: descriptor.capabilities.supports_streaming,
            supports_batch: descriptor.capabilities.supports_batch,
            supports_dictionary_phrases: descriptor.capabilities.supports_dictionary_phrases,
            supports_punctuation_policy: descriptor.capabilities.supports_punctuation_policy,
            supports_context_phrases: descriptor.capabilities.supports_context_phrases,
            supports_diarization: descriptor.capabilities.supports_diarization,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ReadinessProbe for CountingProbe {
        async fn probe(&self, _descriptor: &ProviderDescriptor, _timeout: Duration) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn descriptor(id: &str, implemented: bool, ready: bool) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.to_string(),
            env_key_prefix: id.to_uppercase(),
            implemented,
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                ..ProviderCapabilities::default()
            },
            ready_url: ready.then(|| format!("http://127.0.0.1:0/{id}/ready")),
            handshake_url: None,
        }
    }

    #[tokio::test]
    async fn missing_api_key_marks_unavailable() {
        let config = Arc::new(stt_core::config::EnvConfigProvider::from_map(StdHashMap::new()));
        let cache = AvailabilityCache::new(config, Arc::new(AlwaysReady), vec![descriptor("deepgram", true, false)]);
        let result = cache.get("deepgram", false).await;
        assert!(!result.available);
        assert!(result.reason.unwrap().contains("API_KEY"));
    }

    #[tokio::test]
    async fn available_when_key_present_and_no_probe_required() {
        let mut map = StdHashMap::new();
        map.insert("DEEPGRAM_API_KEY".to_string(), "x".to_string());
        let config = Arc::new(stt_core::config::EnvConfigProvider::from_map(map));
        let cache = AvailabilityCache::new(config, Arc::new(AlwaysReady), vec![descriptor("deepgram", true, false)]);
        let result = cache.get("deepgram", false).await;
        assert!(result.available);
    }

    #[tokio::test]
    async fn ttl_cache_avoids_recomputation() {
        let mut map = StdHashMap::new();
        map.insert("DEEPGRAM_API_KEY".to_string(), "x".to_string());
        let config = Arc::new(stt_core::config::EnvConfigProvider::from_map(map));
        let count = Arc::new(AtomicUsize::new(0));
        let cache = AvailabilityCache::new(
            config,
            Arc::new(CountingProbe(count.clone())),
            vec![descriptor("deepgram", true, true)],
        );
        let _ = cache.get("deepgram", false).await;
        let _ = cache.get("deepgram", false).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "second call must hit the TTL cache");
    }

    #[tokio::test]
    async fn force_bypasses_cache() {
        let mut map = StdHashMap::new();
        map.insert("DEEPGRAM_API_KEY".to_string(), "x".to_string());
        let config = Arc::new(stt_core::config::EnvConfigProvider::from_map(map));
        let count = Arc::new(AtomicUsize::new(0));
        let cache = AvailabilityCache::new(
            config,
            Arc::new(CountingProbe(count.clone())),
            vec![descriptor("deepgram", true, true)],
        );
        let _ = cache.get("deepgram", false).await;
        let _ = cache.get("deepgram", true).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_clears_ttl() {
        let mut map = StdHashMap::new();
        map.insert("DEEPGRAM_API_KEY".to_string(), "x".to_string());
        let config = Arc::new(stt_core::config::EnvConfigProvider::from_map(map));
        let count = Arc::new(AtomicUsize::new(0));
        let cache = AvailabilityCache::new(
            config,
            Arc::new(CountingProbe(count.clone())),
            vec![descriptor("deepgram", true, true)],
        );
        let _ = cache.get("deepgram", false).await;
        cache.invalidate().await;
        let _ = cache.get("deepgram", false).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
