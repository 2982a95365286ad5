//! Axum WebSocket surface for the STT comparator/voice gateway.
//!
//! This crate is the one place allowed to depend on `axum` directly. It
//! implements the client-facing wire protocol: the binary PCM frame codec
//! is `stt_core::codec`, the compare-session orchestrator (C5) lives in
//! [`compare_session`], and the two WebSocket endpoints — `/ws/compare`
//! and `/ws/voice` — translate socket messages into calls against
//! `stt-core`/`stt-providers`/`stt-agent` and back.
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod compare_session;
pub mod compare_ws;
pub mod error;
pub mod providers;
pub mod routes;
pub mod state;
pub mod voice_ws;
pub mod wire;

pub use bootstrap::{AppContext, CorsConfig, ServerConfig, bootstrap, start_server};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
