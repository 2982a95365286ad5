//! C1: binary PCM frame codec for the client↔server audio link.
//!
//! Wire shape is a fixed 16-byte header followed by raw PCM:
//!
//! ```text
//! seq:          u32  little-endian   (bytes 0..4)
//! captureTs:    f64  little-endian   (bytes 4..12)
//! durationMs:   f32  little-endian   (bytes 12..16)
//! pcm:          ..                   (bytes 16..)
//! ```
//!
//! `pcm` is itself 16-bit little-endian mono samples. A buffer that does
//! not carry at least one byte of PCM past the header — including an
//! exact-header-length buffer with no audio at all — is rejected.

use crate::domain::frame::AudioFrame;
use crate::error::GatewayError;

/// Size in bytes of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Decode one binary frame from the client→server link.
///
/// # Errors
///
/// Returns [`GatewayError::ProtocolError`] if `buf` is shorter than or
/// equal to [`HEADER_LEN`] — a frame must carry at least one byte of PCM.
pub fn decode_frame(buf: &[u8]) -> Result<AudioFrame, GatewayError> {
    if buf.len() <= HEADER_LEN {
        return Err(GatewayError::ProtocolError(format!(
            "frame too short: {} bytes, header requires more than {HEADER_LEN}",
            buf.len()
        )));
    }

    let seq = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let capture_ts = f64::from_le_bytes([
        buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
    ]);
    let duration_ms = f32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    let pcm = buf[HEADER_LEN..].to_vec();

    Ok(AudioFrame::new(seq, capture_ts, duration_ms, pcm))
}

/// Encode a frame back into the wire format, e.g. for test fixtures or a
/// loopback/replay adapter.
#[must_use]
pub fn encode_frame(frame: &AudioFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + frame.pcm.len());
    out.extend_from_slice(&frame.seq.to_le_bytes());
    out.extend_from_slice(&frame.capture_ts.to_le_bytes());
    out.extend_from_slice(&frame.duration_ms.to_le_bytes());
    out.extend_from_slice(&frame.pcm);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> AudioFrame {
        AudioFrame::new(7, 1_234.5, 20.0, vec![1, 2, 3, 4])
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let frame = sample_frame();
        let wire = encode_frame(&frame);
        let decoded = decode_frame(&wire).unwrap();
        assert_eq!(decoded.seq, frame.seq);
        assert!((decoded.capture_ts - frame.capture_ts).abs() < f64::EPSILON);
        assert!((decoded.duration_ms - frame.duration_ms).abs() < f32::EPSILON);
        assert_eq!(decoded.pcm, frame.pcm);
    }

    #[test]
    fn rejects_header_only_frame_with_no_pcm() {
        let frame = AudioFrame::new(0, 0.0, 0.0, Vec::new());
        let wire = encode_frame(&frame);
        assert_eq!(wire.len(), HEADER_LEN);
        let err = decode_frame(&wire).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolError(_)));
    }

    #[test]
    fn rejects_buffer_shorter_than_header() {
        let short = vec![0u8; HEADER_LEN - 1];
        let err = decode_frame(&short).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolError(_)));
    }

    #[test]
    fn accepts_frame_with_single_pcm_byte() {
        let frame = AudioFrame::new(1, 0.0, 1.0, vec![0xAB]);
        let wire = encode_frame(&frame);
        let decoded = decode_frame(&wire).unwrap();
        assert_eq!(decoded.pcm, vec![0xAB]);
    }

    #[test]
    fn rejects_empty_buffer() {
        let err = decode_frame(&[]).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolError(_)));
    }

    #[test]
    fn decodes_seq_and_timestamps_independently_of_pcm_length() {
        let wire = encode_frame(&AudioFrame::new(42, -5.5, 33.3, vec![9; 320]));
        let decoded = decode_frame(&wire).unwrap();
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.pcm.len(), 320);
    }
}
