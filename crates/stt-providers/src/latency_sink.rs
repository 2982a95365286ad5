//! Latency sinks: write-only collaborators for per-session
//! [`LatencySummary`] records on teardown. Storage drivers proper are out
//! of scope (§1); these exist only so a composition root has something
//! real to wire behind the `LatencySink` port.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use stt_core::domain::session::LatencySummary;
use stt_core::error::GatewayError;
use stt_core::ports::LatencySink;

/// Emits each summary as a structured `tracing` event. The default sink
/// when no durable append-only log is configured.
#[derive(Debug, Default)]
pub struct TracingLatencySink;

#[async_trait]
impl LatencySink for TracingLatencySink {
    async fn record(&self, session_id: &str, summary: LatencySummary) -> Result<(), GatewayError> {
        tracing::info!(
            session_id,
            count = summary.count,
            avg_ms = summary.avg,
            p50_ms = summary.p50,
            p95_ms = summary.p95,
            min_ms = summary.min,
            max_ms = summary.max,
            "session latency summary"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    session_id: &'a str,
    count: usize,
    avg_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// Appends one JSON line per session summary to a file, serialized
/// behind a mutex so concurrent session teardowns never interleave
/// writes.
pub struct JsonlLatencySink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlLatencySink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl LatencySink for JsonlLatencySink {
    async fn record(&self, session_id: &str, summary: LatencySummary) -> Result<(), GatewayError> {
        let line = SummaryLine {
            session_id,
            count: summary.count,
            avg_ms: summary.avg,
            p50_ms: summary.p50,
            p95_ms: summary.p95,
            min_ms: summary.min,
            max_ms: summary.max,
        };
        let mut serialized =
            serde_json::to_string(&line).map_err(|err| GatewayError::Fatal(err.to_string()))?;
        serialized.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| GatewayError::Fatal(err.to_string()))?;
        file.write_all(serialized.as_bytes())
            .await
            .map_err(|err| GatewayError::Fatal(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> LatencySummary {
        LatencySummary::summarize(&[10.0, 20.0, 30.0]).unwrap()
    }

    #[tokio::test]
    async fn tracing_sink_always_succeeds() {
        let sink = TracingLatencySink;
        sink.record("session-1", summary()).await.unwrap();
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.jsonl");
        let sink = JsonlLatencySink::new(&path);

        sink.record("session-1", summary()).await.unwrap();
        sink.record("session-2", summary()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("session-1"));
        assert!(lines[1].contains("session-2"));
    }
}
