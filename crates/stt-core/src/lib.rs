//! Domain types, ports and the stream normalizer for the STT comparator
//! and voice-agent gateway.
//!
//! This crate is pure domain: plain data, trait ports describing the
//! seams infrastructure plugs into, and the one piece of business logic
//! that must never touch I/O — the stream normalizer (C4). It must not
//! depend on `axum`, `tokio-tungstenite`, or any concrete HTTP/WebSocket
//! client; `stt-providers`, `stt-agent` and `stt-web` depend on this
//! crate, never the other way around.

pub mod cancel;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod normalizer;
pub mod ports;

pub use cancel::{TimeoutOutcome, with_timeout};
pub use codec::{HEADER_LEN, decode_frame, encode_frame};
pub use config::{ConfigProvider, EnvConfigProvider};
pub use error::{GatewayError, Result};
pub use normalizer::{NormalizePreset, StreamNormalizer};
