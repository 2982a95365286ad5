//! Meeting audio gate (C2): per-session speech detector combining an
//! adaptive noise floor with optional VAD-lite sub-frame scoring, an
//! assistant-echo guard, and open/close hysteresis with hangover.
//!
//! Suppresses non-speech audio in meeting mode so that room noise, hold
//! music, and the assistant's own loopback do not trigger turns. Frames
//! with `allow = false` are dropped before reaching any adapter.

use serde::{Deserialize, Serialize};

/// Fixed VAD aggressiveness profile. More aggressive profiles raise all
/// thresholds. Indexed 0..3 per §4.2.
#[derive(Debug, Clone, Copy)]
pub struct VadProfile {
    pub snr_threshold: f32,
    pub zcr_min: f32,
    pub zcr_max: f32,
    pub min_speech_frames: usize,
    pub speech_ratio: f32,
    pub tone_std_ratio: f32,
}

/// The four fixed VAD profiles, most permissive (0) to most aggressive (3).
pub const VAD_PROFILES: [VadProfile; 4] = [
    VadProfile {
        snr_threshold: 1.5,
        zcr_min: 0.02,
        zcr_max: 0.50,
        min_speech_frames: 2,
        speech_ratio: 0.3,
        tone_std_ratio: 0.10,
    },
    VadProfile {
        snr_threshold: 2.0,
        zcr_min: 0.03,
        zcr_max: 0.45,
        min_speech_frames: 3,
        speech_ratio: 0.4,
        tone_std_ratio: 0.15,
    },
    VadProfile {
        snr_threshold: 2.5,
        zcr_min: 0.04,
        zcr_max: 0.40,
        min_speech_frames: 4,
        speech_ratio: 0.5,
        tone_std_ratio: 0.20,
    },
    VadProfile {
        snr_threshold: 3.0,
        zcr_min: 0.05,
        zcr_max: 0.35,
        min_speech_frames: 5,
        speech_ratio: 0.6,
        tone_std_ratio: 0.25,
    },
];

/// Gate configuration, all fields clamped to sane ranges with the
/// defaults given in §4.2.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    pub min_rms: f32,
    pub noise_alpha: f32,
    pub open_factor: f32,
    pub close_factor: f32,
    pub hangover_ms: f64,
    pub assistant_guard_factor: f32,
    pub vad_enabled: bool,
    pub vad_profile: usize,
    /// Sample rate of frames fed to the gate, needed to convert ~20ms
    /// sub-frame windows into sample counts.
    pub sample_rate: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_rms: 0.01,
            noise_alpha: 0.03,
            open_factor: 3.0,
            close_factor: 1.8,
            hangover_ms: 250.0,
            assistant_guard_factor: 1.5,
            vad_enabled: true,
            vad_profile: 1,
            sample_rate: 16_000,
        }
    }
}

impl GateConfig {
    fn profile(&self) -> VadProfile {
        VAD_PROFILES[self.vad_profile.min(VAD_PROFILES.len() - 1)]
    }
}

/// Decision returned for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub allow: bool,
    pub opened: bool,
    pub closed: bool,
    pub speech_detected: bool,
}

/// Per-session gate state.
pub struct MeetingGate {
    config: GateConfig,
    open: bool,
    noise_rms: f32,
    hangover_until_ms: f64,
}

impl MeetingGate {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            noise_rms: config.min_rms,
            config,
            open: false,
            hangover_until_ms: 0.0,
        }
    }

    /// A gate with VAD disabled and zero thresholds: every frame is
    /// allowed (invariant 7), used when meeting mode is off entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(GateConfig {
            vad_enabled: false,
            min_rms: 0.0,
            open_factor: 0.0,
            close_factor: 0.0,
            ..GateConfig::default()
        })
    }

    /// Process one PCM16LE mono frame, `now_ms` being the frame's capture
    /// timestamp (monotonic-enough, per §4.1).
    pub fn process(&mut self, pcm: &[u8], now_ms: f64, assistant_speaking: bool) -> GateDecision {
        let samples = decode_pcm16le(pcm);
        let threshold = self.current_threshold(assistant_speaking);
        if self.config.vad_enabled {
            let (speech_detected, rms) = self.vad_lite(&samples, threshold);
            self.decide(rms, speech_detected, now_ms, assistant_speaking)
        } else {
            let rms = rms_of(&samples);
            self.decide(rms, false, now_ms, assistant_speaking)
        }
    }

    /// Dynamic open/close threshold: `max(minRms, noiseRms * factor) *
    /// (assistantSpeaking ? assistantGuardFactor : 1)` (§4.2 step 3).
    /// Shared by `decide`'s non-VAD RMS check and `vad_lite`'s per-sub-frame
    /// scoring so the assistant-echo guard affects both VAD paths alike.
    fn current_threshold(&self, assistant_speaking: bool) -> f32 {
        let factor = if self.open {
            self.config.close_factor
        } else {
            self.config.open_factor
        };
        let guard = if assistant_speaking {
            self.config.assistant_guard_factor
        } else {
            1.0
        };
        self.config.min_rms.max(self.noise_rms * factor) * guard
    }

    fn decide(
        &mut self,
        rms: f32,
        speech_from_vad: bool,
        now_ms: f64,
        assistant_speaking: bool,
    ) -> GateDecision {
        let threshold = self.current_threshold(assistant_speaking);

        let speech = if self.config.vad_enabled {
            speech_from_vad
        } else {
            rms >= threshold
        };

        if !self.open || rms < self.noise_rms {
            self.noise_rms = (1.0 - self.config.noise_alpha) * self.noise_rms
                + self.config.noise_alpha * rms;
        }

        let mut opened = false;
        let mut closed = false;

        if !self.open && speech {
            self.open = true;
            self.hangover_until_ms = now_ms + self.config.hangover_ms;
            opened = true;
        } else if self.open {
            if speech {
                self.hangover_until_ms = now_ms + self.config.hangover_ms;
            } else if now_ms >= self.hangover_until_ms {
                self.open = false;
                closed = true;
            }
        }

        GateDecision {
            allow: self.open,
            opened,
            closed,
            speech_detected: speech,
        }
    }

    /// VAD-lite: split the frame into ~20ms sub-frames and score each for
    /// RMS/SNR, zero-crossing rate, and tonality (§4.2 step 2). `threshold`
    /// is the dynamic, assistant-guard-scaled floor from `current_threshold`,
    /// not the static `min_rms` default.
    fn vad_lite(&self, samples: &[f32], threshold: f32) -> (bool, f32) {
        let profile = self.config.profile();
        let sub_len = ((self.config.sample_rate as f32 * 0.020) as usize).max(1);
        if samples.is_empty() {
            return (false, 0.0);
        }

        let whole_rms = rms_of(samples);
        let mut speech_sub_frames = 0usize;
        let mut total_sub_frames = 0usize;

        for chunk in samples.chunks(sub_len) {
            total_sub_frames += 1;
            let sub_rms = rms_of(chunk);
            let snr = if self.noise_rms > 0.0 {
                sub_rms / self.noise_rms.max(1e-6)
            } else {
                f32::MAX
            };
            let zcr = zero_crossing_rate(chunk);
            let tonality = tonality_estimate(chunk);

            let rms_ok = sub_rms >= threshold;
            let snr_ok = snr >= profile.snr_threshold;
            let zcr_ok = zcr >= profile.zcr_min && zcr <= profile.zcr_max;
            // "NOT a pure tone": tonality above toneStdRatio means the
            // inter-zero-crossing intervals vary enough to not be a tone.
            let not_tone = tonality >= profile.tone_std_ratio;

            if rms_ok && snr_ok && zcr_ok && not_tone {
                speech_sub_frames += 1;
            }
        }

        if total_sub_frames == 0 {
            return (false, whole_rms);
        }

        let ratio = speech_sub_frames as f32 / total_sub_frames as f32;
        let speech =
            speech_sub_frames >= profile.min_speech_frames && ratio >= profile.speech_ratio;
        (speech, whole_rms)
    }
}

fn decode_pcm16le(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect()
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Tonality estimate: std-dev of inter-zero-crossing intervals divided by
/// their mean. A pure tone has nearly constant intervals, so this is low;
/// noisy/speech-like signal has high variance, so this is high.
fn tonality_estimate(samples: &[f32]) -> f32 {
    let mut crossing_positions = Vec::new();
    for (i, w) in samples.windows(2).enumerate() {
        if (w[0] >= 0.0) != (w[1] >= 0.0) {
            crossing_positions.push(i);
        }
    }
    if crossing_positions.len() < 3 {
        // Too few crossings to estimate tonality reliably; treat as
        // non-tonal so we don't falsely suppress quiet speech onsets.
        return 1.0;
    }
    let intervals: Vec<f32> = crossing_positions
        .windows(2)
        .map(|w| (w[1] - w[0]) as f32)
        .collect();
    let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
    if mean <= 0.0 {
        return 1.0;
    }
    let variance =
        intervals.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / intervals.len() as f32;
    variance.sqrt() / mean
}

/// Whether the assistant is currently speaking, for the echo guard.
/// Separate from `CompareSession`/voice turn state so the gate can be
/// unit-tested standalone.
#[derive(Debug, Clone, Default)]
pub struct AssistantEchoGuard {
    speaking: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl AssistantEchoGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking
            .store(speaking, std::sync::atomic::Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let v = (clamped * 32_767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn sine_wave(freq: f32, amplitude: f32, sample_rate: u32, duration_ms: u32) -> Vec<f32> {
        let n = (sample_rate as f64 * duration_ms as f64 / 1000.0) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn disabled_config_allows_every_frame() {
        let mut gate = MeetingGate::disabled();
        let silence = vec![0u8; 640];
        for i in 0..10 {
            let d = gate.process(&silence, i as f64 * 20.0, false);
            assert!(d.allow, "invariant 7: disabled gate must allow every frame");
        }
    }

    /// S4 — a pure tone is suppressed.
    #[test]
    fn pure_tone_is_suppressed() {
        let mut gate = MeetingGate::new(GateConfig {
            vad_profile: 1,
            ..GateConfig::default()
        });
        let samples = sine_wave(1000.0, 0.05, 16_000, 200);
        let pcm = encode_pcm16le(&samples);
        let d = gate.process(&pcm, 0.0, false);
        assert!(!d.allow);
        assert!(!d.speech_detected);
    }

    /// S4 — a dual-tone mix (more speech-like spectral content) opens the gate.
    #[test]
    fn dual_tone_mix_opens_gate() {
        let mut gate = MeetingGate::new(GateConfig {
            vad_profile: 1,
            ..GateConfig::default()
        });
        let a = sine_wave(300.0, 0.06, 16_000, 200);
        let b = sine_wave(900.0, 0.06, 16_000, 200);
        let mixed: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect();
        let pcm = encode_pcm16le(&mixed);
        let d = gate.process(&pcm, 0.0, false);
        assert!(d.allow);
        assert!(d.speech_detected);
    }

    #[test]
    fn hangover_keeps_gate_open_briefly_after_speech_stops() {
        let mut gate = MeetingGate::new(GateConfig {
            vad_enabled: false,
            hangover_ms: 250.0,
            ..GateConfig::default()
        });
        let loud = encode_pcm16le(&vec![0.5; 320]);
        let silence = encode_pcm16le(&vec![0.0; 320]);

        let d1 = gate.process(&loud, 0.0, false);
        assert!(d1.allow);
        assert!(d1.opened);

        let d2 = gate.process(&silence, 100.0, false);
        assert!(d2.allow, "still within hangover window");

        let d3 = gate.process(&silence, 400.0, false);
        assert!(!d3.allow);
        assert!(d3.closed);
    }

    #[test]
    fn assistant_echo_guard_raises_threshold() {
        let guard = AssistantEchoGuard::new();
        assert!(!guard.is_speaking());
        guard.set_speaking(true);
        assert!(guard.is_speaking());
        guard.set_speaking(false);
        assert!(!guard.is_speaking());
    }
}
