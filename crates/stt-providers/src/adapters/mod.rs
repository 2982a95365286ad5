//! Concrete `ProviderAdapter` implementations (C3).
//!
//! Each adapter translates the uniform `ProviderAdapter`/`AdapterController`
//! contract in `stt_core::ports` into one upstream provider's actual wire
//! protocol. `CompareSession` (C5) never sees these types directly — it only
//! holds `Box<dyn ProviderAdapter>` / `Box<dyn AdapterController>`.

mod mock;
mod realtime_session;
mod subprocess;
mod websocket_cloud;
mod whisper_streaming;

pub use mock::MockAdapter;
pub use realtime_session::RealtimeSessionAdapter;
pub use subprocess::SubprocessAdapter;
pub use websocket_cloud::WebsocketCloudAdapter;
pub use whisper_streaming::WhisperStreamingAdapter;

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with full jitter for batch-transcription
/// retries (§4.3 retry policy): `base * 2^attempt`, capped at `max`, then
/// scaled by a uniform random factor in `[0.5, 1.0]` so that concurrently
/// retrying sessions don't all hammer the provider in lockstep.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(max);
    let jitter: f64 = rand::rng().random_range(0.5..=1.0);
    Duration::from_secs_f64(capped.as_secs_f64() * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(5);
        for attempt in 0..10 {
            let d = backoff_delay(attempt, base, max);
            assert!(d <= max);
        }
    }
}
