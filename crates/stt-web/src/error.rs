//! Axum-facing error mapping.
//!
//! The small HTTP surface this crate exposes (`/health`) has no real
//! error paths, but the composition root and the WebSocket handlers both
//! need a way to turn a [`GatewayError`] into something they can log or
//! send back to a client as an `error` wire message. `HttpError` gives a
//! status-plus-JSON-body response for the rare case a handler needs to
//! reject a request before the socket upgrade completes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use stt_core::error::GatewayError;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ProtocolError(_) | GatewayError::InvalidLanguage(_) => {
                Self::BadRequest(err.to_string())
            }
            GatewayError::AdapterConnect { .. }
            | GatewayError::AdapterTransport { .. }
            | GatewayError::AdapterClosed { .. }
            | GatewayError::UnsupportedCapability(_) => Self::ServiceUnavailable(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}
