//! Compare session orchestrator (C5): the per-client state machine behind
//! `/ws/compare`. Fans one audio stream out to every admitted provider,
//! normalizes each provider's transcripts through C4, and multiplexes
//! everything back to the client as JSON.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stt_core::domain::options::StreamingOptions;
use stt_core::domain::session::LatencySummary;
use stt_core::domain::transcript::PartialTranscript;
use stt_core::error::GatewayError;
use stt_core::normalizer::StreamNormalizer;
use stt_core::ports::{AdapterController, AdapterEvent, AudioMeta, LatencySink};
use stt_providers::gate::{GateConfig, MeetingGate};

use crate::bootstrap::AppContext;
use crate::providers::find_adapter;
use crate::wire::CompareServerMessage;

/// Frames queued per adapter before `sendAudio` backpressure kicks in.
const DEFAULT_SOFT_QUEUE_FRAMES: usize = 64;

#[must_use]
fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Sample rate this adapter variant requires on the wire, independent of
/// what the client captured at (§4.5 step 3: per-provider transcoding).
fn required_sample_rate(provider_id: &str, client_rate: u32) -> u32 {
    match provider_id {
        "realtime" => 24_000,
        _ => client_rate,
    }
}

/// Linear-interpolation resample of 16-bit little-endian mono PCM. A
/// deliberately simple transcoder — good enough to feed an adapter that
/// insists on a fixed rate, not a mastering-grade resampler.
fn resample_pcm16(pcm: &[u8], from_hz: u32, to_hz: u32) -> Vec<u8> {
    if from_hz == to_hz || pcm.len() < 2 {
        return pcm.to_vec();
    }
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    if samples.is_empty() {
        return Vec::new();
    }
    let ratio = f64::from(from_hz) / f64::from(to_hz);
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len * 2);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let lo = src_pos.floor() as usize;
        let hi = (lo + 1).min(samples.len() - 1);
        let frac = src_pos - lo as f64;
        let value = f64::from(samples[lo]) + (f64::from(samples[hi]) - f64::from(samples[lo])) * frac;
        out.extend_from_slice(&(value.round() as i16).to_le_bytes());
    }
    out
}

/// Bounded, drop-oldest audio queue feeding one adapter's serialized
/// `sendAudio` consumer (§4.5 step 5). `push` reports whether the caller
/// should treat this adapter as momentarily saturated (soft threshold).
struct AdapterAudioQueue {
    inner: std::sync::Mutex<VecDeque<(Vec<u8>, AudioMeta)>>,
    notify: Notify,
    soft: usize,
    hard: usize,
    degraded: AtomicBool,
}

impl AdapterAudioQueue {
    fn new(soft: usize) -> Self {
        Self {
            inner: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            soft,
            hard: soft * 2,
            degraded: AtomicBool::new(false),
        }
    }

    fn push(&self, pcm: Vec<u8>, meta: AudioMeta) -> bool {
        let soft_exceeded = {
            let mut q = self.inner.lock().expect("audio queue mutex poisoned");
            q.push_back((pcm, meta));
            if q.len() > self.hard {
                q.pop_front();
                self.degraded.store(true, Ordering::SeqCst);
            }
            q.len() >= self.soft
        };
        self.notify.notify_one();
        soft_exceeded
    }

    async fn pop(&self) -> Option<(Vec<u8>, AudioMeta)> {
        loop {
            {
                let mut q = self.inner.lock().expect("audio queue mutex poisoned");
                if let Some(item) = q.pop_front() {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    fn take_degraded(&self) -> bool {
        self.degraded.swap(false, Ordering::SeqCst)
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("audio queue mutex poisoned").len()
    }

    /// Block until this queue has drained back below its soft threshold,
    /// the release half of §4.5 step 5's backpressure pause.
    async fn wait_until_drained(&self) {
        while self.len() >= self.soft {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

struct AdapterHandle {
    provider: String,
    sample_rate: u32,
    queue: Arc<AdapterAudioQueue>,
    controller: Arc<dyn AdapterController>,
}

/// One running compare session. Owned exclusively by the WebSocket
/// handler that created it; torn down via [`CompareSession::close`].
pub struct CompareSession {
    pub id: Uuid,
    pub started_at: f64,
    pub audio_spec: StreamingOptions,
    handles: Vec<AdapterHandle>,
    gate: Option<Mutex<MeetingGate>>,
    cancel: CancellationToken,
    latencies: Arc<Mutex<Vec<f64>>>,
    last_audio_sent_at: Arc<Mutex<Option<f64>>>,
    latency_sink: Arc<dyn LatencySink>,
    consumers: Vec<tokio::task::JoinHandle<()>>,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
    out_tx: mpsc::Sender<CompareServerMessage>,
}

impl CompareSession {
    /// Run the handshake's provider-admission step (§4.5 steps 1-2):
    /// check availability, start streaming on every admitted provider in
    /// parallel, and report per-provider failures as `error` messages
    /// without aborting the whole session. Fails only if zero providers
    /// started.
    pub async fn start(
        ctx: &AppContext,
        requested_providers: Vec<String>,
        opts: StreamingOptions,
        meeting_mode: bool,
        out_tx: mpsc::Sender<CompareServerMessage>,
    ) -> Result<Self, GatewayError> {
        let id = Uuid::new_v4();
        let started_at = now_ms();
        let cancel = CancellationToken::new();

        let mut admitted = Vec::new();
        for provider_id in &requested_providers {
            let availability = ctx.availability.get(provider_id, false).await;
            if !availability.available {
                let reason = availability.reason.unwrap_or_else(|| "unavailable".to_string());
                let _ = out_tx
                    .send(CompareServerMessage::Error {
                        provider: Some(provider_id.clone()),
                        message: reason,
                    })
                    .await;
                continue;
            }
            let Some(adapter) = find_adapter(&ctx.registry, provider_id) else {
                let _ = out_tx
                    .send(CompareServerMessage::Error {
                        provider: Some(provider_id.clone()),
                        message: "no adapter registered for this provider id".to_string(),
                    })
                    .await;
                continue;
            };
            admitted.push((provider_id.clone(), adapter));
        }

        let latencies = Arc::new(Mutex::new(Vec::new()));
        let last_audio_sent_at = Arc::new(Mutex::new(None));

        let starts = futures_util::future::join_all(admitted.into_iter().map(|(provider_id, adapter)| {
            let opts = opts.clone();
            async move {
                let sample_rate = required_sample_rate(&provider_id, opts.sample_rate);
                let mut adapter_opts = opts.clone();
                adapter_opts.sample_rate = sample_rate;
                let (events_tx, events_rx) = mpsc::channel::<AdapterEvent>(128);
                let result = adapter.start_streaming(&adapter_opts, events_tx).await;
                (provider_id, sample_rate, result, events_rx)
            }
        }))
        .await;

        let mut handles = Vec::new();
        let mut consumers = Vec::new();
        let mut forwarders = Vec::new();
        let normalizer = Arc::new(Mutex::new(StreamNormalizer::new(
            id.to_string(),
            250,
            opts.normalize_preset.as_deref(),
        )));

        for (provider_id, sample_rate, result, events_rx) in starts {
            match result {
                Ok(controller) => {
                    let controller: Arc<dyn AdapterController> = Arc::from(controller);
                    let queue = Arc::new(AdapterAudioQueue::new(DEFAULT_SOFT_QUEUE_FRAMES));

                    consumers.push(tokio::spawn(Self::run_consumer(
                        cancel.clone(),
                        queue.clone(),
                        controller.clone(),
                    )));
                    forwarders.push(tokio::spawn(Self::run_forwarder(
                        provider_id.clone(),
                        events_rx,
                        out_tx.clone(),
                        normalizer.clone(),
                        latencies.clone(),
                        last_audio_sent_at.clone(),
                        queue.clone(),
                    )));

                    handles.push(AdapterHandle {
                        provider: provider_id,
                        sample_rate,
                        queue,
                        controller,
                    });
                }
                Err(err) => {
                    let _ = out_tx
                        .send(CompareServerMessage::Error {
                            provider: Some(provider_id),
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        }

        if handles.is_empty() {
            return Err(GatewayError::Fatal("no providers could be started".to_string()));
        }

        let gate = meeting_mode.then(|| Mutex::new(MeetingGate::new(GateConfig::default())));

        let _ = out_tx
            .send(CompareServerMessage::Session {
                session_id: id.to_string(),
                provider: handles.iter().map(|h| h.provider.clone()).collect(),
                started_at,
                audio_spec: opts.clone(),
            })
            .await;

        Ok(Self {
            id,
            started_at,
            audio_spec: opts,
            handles,
            gate,
            cancel,
            latencies,
            last_audio_sent_at,
            latency_sink: ctx.latency_sink.clone(),
            consumers,
            forwarders,
            out_tx,
        })
    }

    /// Ingest one decoded client frame (§4.5 step 3): optional gate, then
    /// per-adapter resample and enqueue. Returns `true` if any adapter's
    /// queue crossed its soft threshold, signalling the caller to slow
    /// down reading from the socket.
    pub async fn ingest_frame(&self, pcm: Vec<u8>, meta: AudioMeta, assistant_speaking: bool) -> bool {
        if let Some(gate) = &self.gate {
            let decision = gate.lock().await.process(&pcm, meta.capture_ts, assistant_speaking);
            if !decision.allow {
                return false;
            }
        }

        *self.last_audio_sent_at.lock().await = Some(now_ms());

        let mut should_pause = false;
        for handle in &self.handles {
            let resampled = resample_pcm16(&pcm, self.audio_spec.sample_rate, handle.sample_rate);
            if handle.queue.push(resampled, meta) {
                should_pause = true;
            }
        }
        should_pause
    }

    /// Await every adapter queue draining back below its soft threshold.
    /// Callers hold off reading the next client frame while this is
    /// pending, which is the session's half of the soft-backpressure pause
    /// (§4.5 step 5) — the socket read loop lives in `compare_ws.rs`, not
    /// here, so pausing it is the caller's responsibility.
    pub async fn wait_for_drain(&self) {
        for handle in &self.handles {
            handle.queue.wait_until_drained().await;
        }
    }

    async fn run_consumer(
        cancel: CancellationToken,
        queue: Arc<AdapterAudioQueue>,
        controller: Arc<dyn AdapterController>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = queue.pop() => item,
            };
            let Some((pcm, meta)) = next else { break };
            if let Err(err) = controller.send_audio(&pcm, meta).await {
                tracing::warn!(error = %err, "adapter send_audio failed");
                if !err.is_adapter_transient() {
                    break;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_forwarder(
        provider: String,
        mut events_rx: mpsc::Receiver<AdapterEvent>,
        out_tx: mpsc::Sender<CompareServerMessage>,
        normalizer: Arc<Mutex<StreamNormalizer>>,
        latencies: Arc<Mutex<Vec<f64>>>,
        last_audio_sent_at: Arc<Mutex<Option<f64>>>,
        queue: Arc<AdapterAudioQueue>,
    ) {
        while let Some(event) = events_rx.recv().await {
            match event {
                AdapterEvent::Data(mut transcript) => {
                    let latency_ms = last_audio_sent_at.lock().await.map(|sent_at| now_ms() - sent_at);
                    if let Some(latency) = latency_ms {
                        latencies.lock().await.push(latency);
                        transcript.latency_ms.get_or_insert(latency);
                    }
                    let degraded = queue.take_degraded();
                    let normalized = normalizer.lock().await.ingest(&provider, &transcript);

                    if out_tx
                        .send(CompareServerMessage::Transcript { transcript, degraded })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if out_tx.send(CompareServerMessage::Normalized { normalized }).await.is_err() {
                        break;
                    }
                }
                AdapterEvent::Error(err) => {
                    let _ = out_tx
                        .send(CompareServerMessage::Error {
                            provider: Some(provider.clone()),
                            message: err.to_string(),
                        })
                        .await;
                }
                AdapterEvent::Closed => break,
            }
        }
    }

    /// Teardown (§4.5 step 6): cancel intake, politely end then close
    /// every adapter (best-effort), summarize latencies, and persist one
    /// record if any transcripts were observed.
    pub async fn close(self) {
        self.cancel.cancel();
        for consumer in self.consumers {
            let _ = consumer.await;
        }

        for handle in &self.handles {
            let _ = handle.controller.end().await;
            handle.controller.close().await;
        }
        for forwarder in self.forwarders {
            let _ = forwarder.await;
        }

        let samples = self.latencies.lock().await.clone();
        let summary = LatencySummary::summarize(&samples);
        if let Some(summary) = summary.clone() {
            if let Err(err) = self.latency_sink.record(&self.id.to_string(), summary).await {
                tracing::warn!(error = %err, "failed to record latency summary");
            }
        }
        let _ = self
            .out_tx
            .send(CompareServerMessage::SessionEnd {
                session_id: self.id.to_string(),
                summary,
            })
            .await;
        tracing::info!(session_id = %self.id, "session_end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_when_rates_match() {
        let pcm = vec![1, 0, 2, 0, 3, 0];
        assert_eq!(resample_pcm16(&pcm, 16_000, 16_000), pcm);
    }

    #[test]
    fn resample_upsamples_to_more_samples() {
        let samples: Vec<i16> = vec![0, 100, 200, 300];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let resampled = resample_pcm16(&pcm, 16_000, 24_000);
        assert!(resampled.len() / 2 > samples.len());
    }

    #[tokio::test]
    async fn audio_queue_drops_oldest_past_hard_limit() {
        let queue = AdapterAudioQueue::new(2);
        for seq in 0..10u32 {
            queue.push(vec![seq as u8], AudioMeta { capture_ts: 0.0, seq });
        }
        assert!(queue.take_degraded());
        let (_, meta) = queue.pop().await.unwrap();
        assert!(meta.seq > 0, "oldest frames should have been dropped");
    }
}
