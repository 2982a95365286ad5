//! Decoded client audio frame.

/// One decoded audio frame from the client→server binary link.
///
/// `pcm` is 16-bit little-endian mono samples at the session-declared
/// client sample rate. Immutable once decoded.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub seq: u32,
    pub capture_ts: f64,
    pub duration_ms: f32,
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    #[must_use]
    pub fn new(seq: u32, capture_ts: f64, duration_ms: f32, pcm: Vec<u8>) -> Self {
        Self {
            seq,
            capture_ts,
            duration_ms,
            pcm,
        }
    }
}
