//! Deterministic in-process adapter used by tests and local demos: no
//! network calls, echoes the byte-length of each chunk as an interim
//! transcript and emits a fixed final transcript on `end()`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use stt_core::domain::options::{Channel, StreamingOptions};
use stt_core::domain::transcript::{BatchResult, PartialTranscript};
use stt_core::error::GatewayError;
use stt_core::ports::{AdapterController, AdapterEvent, AudioMeta, ProviderAdapter, ProviderCapabilities};

pub struct MockAdapter {
    id: String,
}

impl MockAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

struct MockController {
    id: String,
    events: mpsc::Sender<AdapterEvent>,
    seq: std::sync::atomic::AtomicU32,
    ended: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl AdapterController for MockController {
    async fn send_audio(&self, pcm: &[u8], meta: AudioMeta) -> Result<(), GatewayError> {
        if self.ended.load(std::sync::atomic::Ordering::Acquire) {
            return Err(GatewayError::AdapterClosed {
                provider: self.id.clone(),
                message: "send_audio after end()".to_string(),
            });
        }
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let partial = PartialTranscript {
            provider: self.id.clone(),
            is_final: false,
            text: format!("<{} bytes>", pcm.len()),
            words: None,
            timestamp: meta.capture_ts,
            origin_capture_ts: Some(meta.capture_ts),
            channel: Channel::Mic,
            latency_ms: Some(0.0),
            speaker_id: None,
            seq: Some(seq),
        };
        let _ = self.events.send(AdapterEvent::Data(partial)).await;
        Ok(())
    }

    async fn end(&self) -> Result<(), GatewayError> {
        self.ended.store(true, std::sync::atomic::Ordering::Release);
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let final_transcript = PartialTranscript {
            provider: self.id.clone(),
            is_final: true,
            text: "mock final transcript".to_string(),
            words: None,
            timestamp: 0.0,
            origin_capture_ts: None,
            channel: Channel::Mic,
            latency_ms: Some(0.0),
            speaker_id: None,
            seq: Some(seq),
        };
        let _ = self.events.send(AdapterEvent::Data(final_transcript)).await;
        let _ = self.events.send(AdapterEvent::Closed).await;
        Ok(())
    }

    async fn close(&self) {
        self.ended.store(true, std::sync::atomic::Ordering::Release);
        let _ = self.events.send(AdapterEvent::Closed).await;
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_batch: true,
            supports_dictionary_phrases: true,
            supports_punctuation_policy: true,
            supports_context_phrases: true,
            supports_diarization: false,
        }
    }

    async fn start_streaming(
        &self,
        _opts: &StreamingOptions,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Box<dyn AdapterController>, GatewayError> {
        Ok(Box::new(MockController {
            id: self.id.clone(),
            events,
            seq: std::sync::atomic::AtomicU32::new(0),
            ended: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    async fn transcribe_file(
        &self,
        pcm: &[u8],
        _opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError> {
        Ok(BatchResult {
            text: format!("mock batch transcript of {} bytes", pcm.len()),
            words: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> StreamingOptions {
        StreamingOptions {
            language: "en-US".to_string(),
            sample_rate: 16_000,
            encoding: "pcm16le".to_string(),
            enable_interim: true,
            enable_diarization: false,
            punctuation_policy: stt_core::domain::options::PunctuationPolicy::Basic,
            dictionary_phrases: Vec::new(),
            context_phrases: Vec::new(),
            enable_vad: false,
            normalize_preset: None,
            parallel: 1,
        }
    }

    #[tokio::test]
    async fn streaming_echoes_chunk_length_then_final_on_end() {
        let adapter = MockAdapter::new("mock");
        let (tx, mut rx) = mpsc::channel(8);
        let controller = adapter.start_streaming(&opts(), tx).await.unwrap();

        controller
            .send_audio(&[0u8; 320], AudioMeta::default())
            .await
            .unwrap();
        controller.end().await.unwrap();

        let first = rx.recv().await.unwrap();
        let AdapterEvent::Data(partial) = first else {
            panic!("expected data event");
        };
        assert_eq!(partial.text, "<320 bytes>");
        assert!(!partial.is_final);

        let second = rx.recv().await.unwrap();
        let AdapterEvent::Data(final_transcript) = second else {
            panic!("expected data event");
        };
        assert!(final_transcript.is_final);

        assert!(matches!(rx.recv().await, Some(AdapterEvent::Closed)));
    }

    #[tokio::test]
    async fn send_audio_after_end_is_rejected() {
        let adapter = MockAdapter::new("mock");
        let (tx, _rx) = mpsc::channel(8);
        let controller = adapter.start_streaming(&opts(), tx).await.unwrap();
        controller.end().await.unwrap();
        let result = controller.send_audio(&[0u8; 10], AudioMeta::default()).await;
        assert!(matches!(result, Err(GatewayError::AdapterClosed { .. })));
    }

    #[tokio::test]
    async fn transcribe_file_returns_batch_result() {
        let adapter = MockAdapter::new("mock");
        let result = adapter.transcribe_file(&[0u8; 1000], &opts()).await.unwrap();
        assert!(result.text.contains("1000"));
    }
}
