//! The closed error-kind set for the gateway.
//!
//! Every fallible operation in `stt-core`, `stt-providers`, `stt-agent`
//! and `stt-web` resolves to one of these kinds. Policy: recover locally
//! wherever a single adapter fails; surface to the user only when the
//! user-visible experience is affected.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed client message, or binary audio received before config.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Requested language is not in the provider's supported set.
    #[error("invalid language: {0}")]
    InvalidLanguage(String),

    /// Requested capability (e.g. streaming) is not supported by the
    /// adapter/provider combination.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Adapter failed to establish its upstream connection.
    #[error("adapter connect failed ({provider}): {message}")]
    AdapterConnect { provider: String, message: String },

    /// Adapter's upstream connection failed after being open.
    #[error("adapter transport error ({provider}): {message}")]
    AdapterTransport { provider: String, message: String },

    /// Adapter's upstream connection closed (gracefully or not).
    #[error("adapter closed ({provider}): {message}")]
    AdapterClosed { provider: String, message: String },

    /// An operation exceeded its deadline.
    #[error("timeout in {operation} after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Provider responded with a rate-limit status; batch callers may retry.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transient failure eligible for bounded retry (batch only).
    #[error("retryable error: {0}")]
    Retryable(String),

    /// Expected cancellation (barge-in, stop, socket close). Never
    /// surfaced to clients.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected, logged, closes the session.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl GatewayError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_adapter_transient(&self) -> bool {
        matches!(
            self,
            Self::AdapterConnect { .. } | Self::AdapterTransport { .. } | Self::AdapterClosed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
