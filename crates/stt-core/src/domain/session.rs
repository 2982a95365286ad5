//! Per-client session bookkeeping shared by compare and voice sessions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::options::StreamingOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// A running compare or voice session. Owned exclusively by its `stt-web`
/// orchestrator (C5/C6) for its full lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub providers: Vec<String>,
    pub language: String,
    pub started_at: f64,
    pub audio_spec: StreamingOptions,
    pub state: SessionState,
    pub sent_latencies: Vec<f64>,
}

impl Session {
    #[must_use]
    pub fn new(
        id: Uuid,
        providers: Vec<String>,
        language: String,
        started_at: f64,
        audio_spec: StreamingOptions,
    ) -> Self {
        Self {
            id,
            providers,
            language,
            started_at,
            audio_spec,
            state: SessionState::Active,
            sent_latencies: Vec::new(),
        }
    }

    pub fn record_latency(&mut self, latency_ms: f64) {
        self.sent_latencies.push(latency_ms);
    }
}

/// Summary statistics over a session's recorded transcript latencies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencySummary {
    /// Summarize a set of latency samples using linear-interpolation
    /// quantiles (`pos = (n-1) * q`). Returns `None` for an empty input —
    /// callers must not persist a summary with `count == 0`.
    #[must_use]
    pub fn summarize(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let avg = sorted.iter().sum::<f64>() / count as f64;
        let quantile = |q: f64| -> f64 {
            if count == 1 {
                return sorted[0];
            }
            let pos = (count - 1) as f64 * q;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                let frac = pos - lo as f64;
                sorted[lo] + (sorted[hi] - sorted[lo]) * frac
            }
        };
        Some(Self {
            count,
            avg,
            p50: quantile(0.50),
            p95: quantile(0.95),
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_samples_summarize_to_none() {
        assert!(LatencySummary::summarize(&[]).is_none());
    }

    #[test]
    fn single_sample_summary() {
        let s = LatencySummary::summarize(&[42.0]).unwrap();
        assert_eq!(s.count, 1);
        assert!((s.avg - 42.0).abs() < f64::EPSILON);
        assert!((s.p50 - 42.0).abs() < f64::EPSILON);
        assert!((s.p95 - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quantiles_interpolate() {
        let samples = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        let s = LatencySummary::summarize(&samples).unwrap();
        assert_eq!(s.count, 5);
        assert!((s.p50 - 30.0).abs() < f64::EPSILON);
        assert!((s.min - 10.0).abs() < f64::EPSILON);
        assert!((s.max - 50.0).abs() < f64::EPSILON);
    }
}
