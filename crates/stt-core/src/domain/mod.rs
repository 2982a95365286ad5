//! Domain types: plain data, no I/O, independent of any infrastructure.

pub mod availability;
pub mod frame;
pub mod normalized;
pub mod options;
pub mod session;
pub mod transcript;
pub mod turn;

pub use availability::ProviderAvailability;
pub use frame::AudioFrame;
pub use normalized::{NormalizedEvent, WindowState};
pub use options::{Channel, PunctuationPolicy, StreamingOptions};
pub use session::{LatencySummary, Session, SessionState};
pub use transcript::{BatchResult, PartialTranscript, Word};
pub use turn::{EndReason, History, HistoryMessage, MessageRole, TurnPhase, VoiceTurn};
