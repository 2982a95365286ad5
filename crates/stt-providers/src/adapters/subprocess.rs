//! Local subprocess adapter (§4.3): batch-only, invokes a local ASR binary
//! against a temporary WAV file and parses its JSON result.
//!
//! Streaming is structurally unsupported — `start_streaming` always fails
//! with `UnsupportedCapability`, matching the spec's note that this
//! adapter variant never establishes a persistent upstream connection.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use stt_core::domain::options::StreamingOptions;
use stt_core::domain::transcript::{BatchResult, Word};
use stt_core::error::GatewayError;
use stt_core::ports::{AdapterController, AdapterEvent, ProviderAdapter, ProviderCapabilities};

/// Walk a weakly-typed batch-transcription JSON response in the fixed
/// abstract extraction order from §9: `results[i].channels[*].alternatives[*].transcript`,
/// then `results[i].alternatives[*].transcript`, then
/// `results[i].utterances[*].transcript`, then `results[i].transcript`, then
/// top-level `utterances[*].transcript`. Non-empty trimmed strings found
/// along the way are concatenated with a single space. The first
/// alternative's word list (if any) is returned alongside.
#[must_use]
pub fn extract_batch_transcript(body: &serde_json::Value) -> BatchResult {
    let mut pieces = Vec::new();
    let mut words = None;

    if let Some(results) = body.get("results").and_then(serde_json::Value::as_array) {
        for result in results {
            if let Some(channels) = result.get("channels").and_then(serde_json::Value::as_array) {
                for channel in channels {
                    collect_alternatives(channel, &mut pieces, &mut words);
                }
                continue;
            }
            if collect_alternatives(result, &mut pieces, &mut words) {
                continue;
            }
            if let Some(utterances) = result.get("utterances").and_then(serde_json::Value::as_array) {
                collect_transcripts(utterances, &mut pieces);
                continue;
            }
            if let Some(text) = result.get("transcript").and_then(serde_json::Value::as_str) {
                push_trimmed(&mut pieces, text);
            }
        }
    }

    if pieces.is_empty()
        && let Some(utterances) = body.get("utterances").and_then(serde_json::Value::as_array)
    {
        collect_transcripts(utterances, &mut pieces);
    }

    BatchResult {
        text: pieces.join(" "),
        words,
    }
}

/// Appends every non-empty trimmed `alternatives[*].transcript` under
/// `node`, recording the first alternative's word list if not already
/// captured. Returns `true` if an `alternatives` array was present at all
/// (so the caller can stop walking further extraction branches).
fn collect_alternatives(
    node: &serde_json::Value,
    pieces: &mut Vec<String>,
    words: &mut Option<Vec<Word>>,
) -> bool {
    let Some(alternatives) = node.get("alternatives").and_then(serde_json::Value::as_array) else {
        return false;
    };
    for (idx, alt) in alternatives.iter().enumerate() {
        if let Some(text) = alt.get("transcript").and_then(serde_json::Value::as_str) {
            push_trimmed(pieces, text);
        }
        if idx == 0 && words.is_none()
            && let Some(word_list) = alt.get("words").and_then(serde_json::Value::as_array)
        {
            let parsed: Vec<Word> = word_list
                .iter()
                .filter_map(|w| {
                    Some(Word {
                        start: w.get("start")?.as_f64()?,
                        end: w.get("end")?.as_f64()?,
                        text: w.get("text")?.as_str()?.to_string(),
                        confidence: w.get("confidence").and_then(serde_json::Value::as_f64).map(|c| c as f32),
                    })
                })
                .collect();
            if !parsed.is_empty() {
                *words = Some(parsed);
            }
        }
    }
    true
}

fn collect_transcripts(nodes: &[serde_json::Value], pieces: &mut Vec<String>) {
    for node in nodes {
        if let Some(text) = node.get("transcript").and_then(serde_json::Value::as_str) {
            push_trimmed(pieces, text);
        }
    }
}

fn push_trimmed(pieces: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        pieces.push(trimmed.to_string());
    }
}

/// Encode 16-bit LE mono PCM at `sample_rate` into a WAV byte buffer.
fn encode_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, GatewayError> {
    let mut buf = Vec::new();
    {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer =
            hound::WavWriter::new(cursor, spec).map_err(|err| GatewayError::Fatal(err.to_string()))?;
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer
                .write_sample(sample)
                .map_err(|err| GatewayError::Fatal(err.to_string()))?;
        }
        writer.finalize().map_err(|err| GatewayError::Fatal(err.to_string()))?;
    }
    Ok(buf)
}

/// Batch-only adapter that shells out to a local ASR binary per call. No
/// streaming session is ever established.
pub struct SubprocessAdapter {
    id: String,
    binary_path: PathBuf,
    extra_args: Vec<String>,
}

impl SubprocessAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, binary_path: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            binary_path: binary_path.into(),
            extra_args,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SubprocessAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: false,
            supports_batch: true,
            supports_dictionary_phrases: false,
            supports_punctuation_policy: false,
            supports_context_phrases: false,
            supports_diarization: false,
        }
    }

    async fn start_streaming(
        &self,
        _opts: &StreamingOptions,
        _events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Box<dyn AdapterController>, GatewayError> {
        Err(GatewayError::UnsupportedCapability(format!(
            "{} is a batch-only local subprocess adapter",
            self.id
        )))
    }

    async fn transcribe_file(
        &self,
        pcm: &[u8],
        opts: &StreamingOptions,
    ) -> Result<BatchResult, GatewayError> {
        let wav = encode_wav(pcm, opts.sample_rate)?;

        let dir = tempfile::tempdir().map_err(|err| GatewayError::Fatal(err.to_string()))?;
        let wav_path = dir.path().join("input.wav");
        let mut file = tokio::fs::File::create(&wav_path)
            .await
            .map_err(|err| GatewayError::Fatal(err.to_string()))?;
        file.write_all(&wav)
            .await
            .map_err(|err| GatewayError::Fatal(err.to_string()))?;
        file.flush().await.map_err(|err| GatewayError::Fatal(err.to_string()))?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg(&wav_path)
            .args(&self.extra_args)
            .arg("--language")
            .arg(&opts.language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = command
            .output()
            .await
            .map_err(|err| GatewayError::AdapterConnect {
                provider: self.id.clone(),
                message: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(GatewayError::Fatal(format!(
                "{} exited with {}: {}",
                self.id,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| GatewayError::Fatal(format!("invalid subprocess JSON: {err}")))?;
        Ok(extract_batch_transcript(&parsed))
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
            enable_interim: false,
            enable_diarization: false,
            punctuation_policy: stt_core::domain::options::PunctuationPolicy::Basic,
            dictionary_phrases: Vec::new(),
            context_phrases: Vec::new(),
            enable_vad: false,
            normalize_preset: None,
            parallel: 1,
        }
    }

    #[test]
    fn extracts_from_channels_alternatives() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{"results":[{"channels":[{"alternatives":[{"transcript":"hello world","words":[{"start":0.0,"end":0.5,"text":"hello"}]}]}]}]}"#,
        )
        .unwrap();
        let out = extract_batch_transcript(&body);
        assert_eq!(out.text, "hello world");
        assert_eq!(out.words.unwrap().len(), 1);
    }

    #[test]
    fn extracts_from_result_level_alternatives() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"results":[{"alternatives":[{"transcript":"foo"}]}]}"#).unwrap();
        assert_eq!(extract_batch_transcript(&body).text, "foo");
    }

    #[test]
    fn extracts_from_result_level_utterances() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"results":[{"utterances":[{"transcript":"a"},{"transcript":"b"}]}]}"#).unwrap();
        assert_eq!(extract_batch_transcript(&body).text, "a b");
    }

    #[test]
    fn extracts_from_result_transcript() {
        let body: serde_json::Value = serde_json::from_str(r#"{"results":[{"transcript":"plain"}]}"#).unwrap();
        assert_eq!(extract_batch_transcript(&body).text, "plain");
    }

    #[test]
    fn extracts_from_top_level_utterances_as_last_resort() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"utterances":[{"transcript":"x"},{"transcript":"  "}]}"#).unwrap();
        assert_eq!(extract_batch_transcript(&body).text, "x");
    }

    #[test]
    fn streaming_is_unsupported() {
        let adapter = SubprocessAdapter::new("whisper-local", "/bin/true", Vec::new());
        let (tx, _rx) = mpsc::channel(1);
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(adapter.start_streaming(&opts(), tx));
        assert!(matches!(result, Err(GatewayError::UnsupportedCapability(_))));
    }
}
