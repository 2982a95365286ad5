//! Cancellation and timeout helpers.
//!
//! Replaces the source's ad-hoc `AbortController` pattern (§9 design
//! notes) with an explicit `with_timeout` helper: a child cancellation
//! scope that propagates the parent's cancellation, reports whether it
//! was the timeout (rather than the parent) that fired, and guarantees
//! the timer is cleaned up on every exit path — `tokio::time::timeout`
//! drops its internal sleep future unconditionally when the returned
//! future resolves or is dropped, so no explicit timer teardown is
//! needed beyond that.
//!
//! Turn-scoped cancellation (C6 barge-in/stop) and session-scoped
//! cancellation (C5 teardown) are both represented as
//! [`tokio_util::sync::CancellationToken`], which is already a workspace
//! dependency for tying child scopes to a parent.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

/// Outcome of a [`with_timeout`] call.
#[derive(Debug)]
pub enum TimeoutOutcome<T> {
    /// The future completed before the timeout or cancellation fired.
    Completed(T),
    /// The deadline elapsed first.
    TimedOut,
    /// The parent (or child) cancellation token fired first.
    Cancelled,
}

/// Run `fut` under a timeout, cooperating with an existing cancellation
/// `token`. Returns as soon as whichever of (future, timeout, cancel)
/// fires first; the other two are simply dropped.
///
/// `operation` names the call for the `Timeout`/`Cancelled` error kinds
/// so callers can report which suspension point (§5) was waiting.
pub async fn with_timeout<F, T>(
    token: &CancellationToken,
    operation: &str,
    duration: Duration,
    fut: F,
) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(GatewayError::Cancelled),
        result = tokio::time::timeout(duration, fut) => {
            result.map_err(|_| GatewayError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: duration.as_millis() as u64,
            })
        }
    }
}

/// Non-error-returning variant for call sites that want to inspect the
/// outcome directly rather than collapse it into a `GatewayError`.
pub async fn with_timeout_outcome<F, T>(
    token: &CancellationToken,
    duration: Duration,
    fut: F,
) -> TimeoutOutcome<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => TimeoutOutcome::Cancelled,
        result = tokio::time::timeout(duration, fut) => {
            match result {
                Ok(v) => TimeoutOutcome::Completed(v),
                Err(_) => TimeoutOutcome::TimedOut,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_timeout() {
        let token = CancellationToken::new();
        let result = with_timeout(&token, "op", Duration::from_millis(50), async { 42 }).await;
        assert!(matches!(result, Ok(42)));
    }

    #[tokio::test]
    async fn times_out() {
        let token = CancellationToken::new();
        let result = with_timeout(&token, "op", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_future() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_timeout(&token, "op", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }
}
