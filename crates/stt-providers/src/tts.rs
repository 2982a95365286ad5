//! OpenAI TTS client implementing [`TtsProvider`] (C6's "speak" phase):
//! POSTs text to the speech endpoint and streams the PCM response back to
//! the turn machine in fixed-duration frames.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stt_core::error::GatewayError;
use stt_core::ports::{TtsProvider, TtsStats};
use stt_core::with_timeout;

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
/// 16-bit mono PCM, matching the client link's sample format (§4.1).
const SAMPLE_RATE: u32 = 24_000;
const BYTES_PER_SAMPLE: u32 = 2;

/// Clamp a requested `OPENAI_TTS_FRAME_MS` into the spec's accepted range.
#[must_use]
pub fn clamp_frame_ms(frame_ms: u32) -> u32 {
    frame_ms.clamp(10, 500)
}

fn bytes_per_frame(frame_ms: u32) -> usize {
    ((SAMPLE_RATE * BYTES_PER_SAMPLE / 1000) * frame_ms) as usize
}

/// `TtsProvider` backed by OpenAI's `/v1/audio/speech` endpoint, chunked
/// into fixed-duration PCM frames for the turn machine's producer task.
pub struct OpenAiTtsProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    voice: String,
    frame_ms: u32,
    timeout: Duration,
}

impl OpenAiTtsProvider {
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        frame_ms: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            frame_ms: clamp_frame_ms(frame_ms),
            timeout,
        }
    }
}

#[async_trait]
impl TtsProvider for OpenAiTtsProvider {
    async fn synthesize(
        &self,
        text: &str,
        cancel: &CancellationToken,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<TtsStats, GatewayError> {
        let start = Instant::now();
        let body = json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "pcm",
        });

        let request = self
            .client
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = with_timeout(cancel, "tts_request", self.timeout, request)
            .await?
            .map_err(|err| GatewayError::AdapterTransport {
                provider: "openai-tts".to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited("openai tts synthesis".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Fatal(format!(
                "openai tts synthesis returned {status}: {text}"
            )));
        }

        let frame_len = bytes_per_frame(self.frame_ms);
        let mut pending = Vec::with_capacity(frame_len);
        let mut ttfb_ms = None;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let chunk: Bytes = chunk.map_err(|err| GatewayError::AdapterTransport {
                provider: "openai-tts".to_string(),
                message: err.to_string(),
            })?;
            if ttfb_ms.is_none() && !chunk.is_empty() {
                ttfb_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
            }
            pending.extend_from_slice(&chunk);
            while pending.len() >= frame_len {
                let frame: Vec<u8> = pending.drain(..frame_len).collect();
                if audio_tx.send(frame).await.is_err() {
                    return Err(GatewayError::Cancelled);
                }
            }
        }
        if !pending.is_empty() && audio_tx.send(pending).await.is_err() {
            return Err(GatewayError::Cancelled);
        }

        Ok(TtsStats {
            ttfb_ms: ttfb_ms.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_frame_ms_enforces_lower_bound() {
        assert_eq!(clamp_frame_ms(1), 10);
    }

    #[test]
    fn clamp_frame_ms_enforces_upper_bound() {
        assert_eq!(clamp_frame_ms(10_000), 500);
    }

    #[test]
    fn clamp_frame_ms_passes_through_valid_values() {
        assert_eq!(clamp_frame_ms(40), 40);
    }

    #[test]
    fn bytes_per_frame_matches_sample_rate_and_width() {
        // 40ms @ 24kHz, 16-bit mono: 24000 * 2 / 1000 * 40 = 1920 bytes.
        assert_eq!(bytes_per_frame(40), 1920);
    }

    #[test]
    fn constructor_clamps_out_of_range_frame_ms() {
        let provider = OpenAiTtsProvider::new("key", "tts-1", "alloy", 5, Duration::from_secs(1));
        assert_eq!(provider.frame_ms, 10);
    }
}
