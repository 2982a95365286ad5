//! Voice-agent turn state machine (C6): listen → think → speak, layered on
//! top of one STT adapter's finals.
//!
//! This crate is pure domain — it depends only on `stt-core` for the
//! `LlmProvider`/`TtsProvider` ports, `History`/`TurnPhase` types, and the
//! cancellation helper. It never touches axum, tokio-tungstenite, or
//! reqwest directly; `stt-web` wires a concrete `LlmProvider`/`TtsProvider`
//! into it and forwards its `VoiceEvent`s and audio chunks to the client
//! socket.
//!
//! The hard part is concurrency, not synthesis: a turn that is aborted
//! (barge-in, `stop_speaking`, or superseded by a new user final) must
//! never let its in-flight LLM/TTS work mutate history or re-emit a
//! terminal event after a newer turn has taken over (§4.6, invariant 4,
//! scenarios S5/S6). Every background step captures its own `turn_id`
//! locally and re-checks it against the session's current turn before
//! applying any mutation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stt_core::domain::turn::{EndReason, History, MessageRole, TurnPhase};
use stt_core::error::GatewayError;
use stt_core::ports::{LlmProvider, TtsProvider};

/// Server→client voice-mode messages (§6). Field casing is camelCase per
/// message, variant tags are the snake_case wire names from the spec.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    #[serde(rename_all = "camelCase")]
    VoiceState { state: TurnPhase },
    #[serde(rename_all = "camelCase")]
    VoiceUserTranscript { turn_id: Uuid, text: String },
    #[serde(rename_all = "camelCase")]
    VoiceAssistantText { turn_id: Uuid, text: String, is_final: bool },
    #[serde(rename_all = "camelCase")]
    VoiceAssistantAudioStart {
        turn_id: Uuid,
        llm_ms: f64,
        tts_ttfb_ms: f64,
    },
    #[serde(rename_all = "camelCase")]
    VoiceAssistantAudioEnd { turn_id: Uuid, reason: EndReason },
    #[serde(rename_all = "camelCase")]
    Error { turn_id: Option<Uuid>, message: String },
}

/// Client→server voice commands (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    BargeIn,
    StopSpeaking,
    ResetHistory,
}

/// Timeouts applied to the LLM and TTS steps of one turn (§5).
#[derive(Debug, Clone, Copy)]
pub struct TurnTimeouts {
    pub llm: Duration,
    pub tts: Duration,
}

impl Default for TurnTimeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_secs(60),
            tts: Duration::from_secs(60),
        }
    }
}

struct Inner {
    phase: TurnPhase,
    current_turn: Option<Uuid>,
    cancel: Option<CancellationToken>,
    history: History,
    max_history_turns: usize,
}

/// One session's listen/think/speak state machine. Cheap to clone — all
/// shared state lives behind the inner `Mutex`; cloning hands out another
/// handle to the same turn machine (used so a background turn task can
/// re-check state without holding a borrow across an `.await`).
#[derive(Clone)]
pub struct VoiceTurnMachine {
    inner: Arc<Mutex<Inner>>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    timeouts: TurnTimeouts,
}

impl VoiceTurnMachine {
    #[must_use]
    pub fn new(
        system_prompt: Option<String>,
        max_history_turns: usize,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        timeouts: TurnTimeouts,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: TurnPhase::Listening,
                current_turn: None,
                cancel: None,
                history: History::new(system_prompt),
                max_history_turns,
            })),
            llm,
            tts,
            timeouts,
        }
    }

    #[must_use]
    pub async fn phase(&self) -> TurnPhase {
        self.inner.lock().await.phase
    }

    /// A user final transcript arrived. Supersedes any active turn (§4.6):
    /// if the previous turn was `speaking`, emits its terminal
    /// `voice_assistant_audio_end{reason: barge_in}` before starting the
    /// new one. Returns the new turn's id. Spawns the LLM/TTS pipeline in
    /// the background and returns immediately — callers must not await
    /// completion of the turn itself.
    pub async fn on_final_transcript(
        &self,
        text: String,
        event_tx: mpsc::Sender<VoiceEvent>,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) -> Uuid {
        let new_turn_id = Uuid::new_v4();
        let new_cancel = CancellationToken::new();

        let superseded = {
            let mut g = self.inner.lock().await;
            let prev = (g.current_turn, g.phase, g.cancel.take());
            g.history.push(MessageRole::User, text.clone());
            g.current_turn = Some(new_turn_id);
            g.phase = TurnPhase::Thinking;
            g.cancel = Some(new_cancel.clone());
            prev
        };

        if let (Some(old_turn), old_phase, Some(old_cancel)) = superseded {
            old_cancel.cancel();
            if old_phase == TurnPhase::Speaking {
                let _ = event_tx
                    .send(VoiceEvent::VoiceAssistantAudioEnd {
                        turn_id: old_turn,
                        reason: EndReason::BargeIn,
                    })
                    .await;
            }
        }

        let _ = event_tx
            .send(VoiceEvent::VoiceUserTranscript {
                turn_id: new_turn_id,
                text,
            })
            .await;
        let _ = event_tx
            .send(VoiceEvent::VoiceState {
                state: TurnPhase::Thinking,
            })
            .await;

        let machine = self.clone();
        tokio::spawn(async move {
            machine.run_turn(new_turn_id, new_cancel, event_tx, audio_tx).await;
        });

        new_turn_id
    }

    /// `barge_in` / `stop_speaking` / `reset_history` (§4.6). Abort is
    /// synchronous: state is claimed here before the cancellation token is
    /// even signalled, so the background turn task's own completion check
    /// always loses the race and never double-emits a terminal event.
    pub async fn on_command(&self, cmd: VoiceCommand, event_tx: mpsc::Sender<VoiceEvent>) {
        if cmd == VoiceCommand::ResetHistory {
            self.inner.lock().await.history.reset();
            return;
        }

        let aborted = {
            let mut g = self.inner.lock().await;
            if g.phase == TurnPhase::Listening {
                None
            } else {
                let turn_id = g.current_turn.take();
                let cancel = g.cancel.take();
                let phase = g.phase;
                g.phase = TurnPhase::Listening;
                turn_id.zip(cancel).map(|(id, c)| (id, phase, c))
            }
        };

        let Some((turn_id, phase, cancel)) = aborted else {
            return;
        };
        cancel.cancel();

        // Thinking-phase aborts always report `stopped` — no audio was
        // ever sent, regardless of which command triggered the abort.
        let reason = match (cmd, phase) {
            (_, TurnPhase::Thinking) => EndReason::Stopped,
            (VoiceCommand::BargeIn, TurnPhase::Speaking) => EndReason::BargeIn,
            (VoiceCommand::StopSpeaking, TurnPhase::Speaking) => EndReason::Stopped,
            _ => EndReason::Stopped,
        };
        let _ = event_tx
            .send(VoiceEvent::VoiceAssistantAudioEnd { turn_id, reason })
            .await;
        let _ = event_tx
            .send(VoiceEvent::VoiceState {
                state: TurnPhase::Listening,
            })
            .await;
    }

    async fn run_turn(
        &self,
        turn_id: Uuid,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<VoiceEvent>,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) {
        let history_snapshot = {
            let g = self.inner.lock().await;
            g.history.messages().to_vec()
        };

        let t0 = Instant::now();
        let reply = stt_core::cancel::with_timeout(
            &cancel,
            "llm_complete",
            self.timeouts.llm,
            self.llm.complete(&history_snapshot, &cancel),
        )
        .await;
        let llm_ms = t0.elapsed().as_secs_f64() * 1000.0;

        let reply = match reply {
            Ok(Ok(text)) => text,
            Ok(Err(err)) | Err(err) => {
                if err.is_cancelled() {
                    // Superseded while thinking; silently discard (§4.6).
                    return;
                }
                self.fail_turn(turn_id, &err, event_tx).await;
                return;
            }
        };

        // Re-check ownership before moving on to the (visible) text event
        // and TTS step — a barge-in could have landed between the LLM
        // call resolving and this check.
        if !self.claims_turn(turn_id).await {
            return;
        }
        let _ = event_tx
            .send(VoiceEvent::VoiceAssistantText {
                turn_id,
                text: reply.clone(),
                is_final: true,
            })
            .await;

        self.run_speaking(turn_id, reply, llm_ms, cancel, event_tx, audio_tx)
            .await;
    }

    async fn fail_turn(&self, turn_id: Uuid, err: &GatewayError, event_tx: mpsc::Sender<VoiceEvent>) {
        let mut g = self.inner.lock().await;
        if g.current_turn != Some(turn_id) {
            return;
        }
        g.current_turn = None;
        g.cancel = None;
        g.phase = TurnPhase::Listening;
        drop(g);
        let _ = event_tx
            .send(VoiceEvent::VoiceAssistantText {
                turn_id,
                text: "Sorry, I couldn't process that.".to_string(),
                is_final: true,
            })
            .await;
        let _ = event_tx
            .send(VoiceEvent::Error {
                turn_id: Some(turn_id),
                message: err.to_string(),
            })
            .await;
        let _ = event_tx
            .send(VoiceEvent::VoiceState {
                state: TurnPhase::Listening,
            })
            .await;
    }

    async fn claims_turn(&self, turn_id: Uuid) -> bool {
        self.inner.lock().await.current_turn == Some(turn_id)
    }

    /// Producer/consumer TTS streaming (§9): a background task drives
    /// `TtsProvider::synthesize` into a local channel; this loop forwards
    /// chunks to the client's `audio_tx`, watching `cancel` at every
    /// chunk boundary, and only transitions to `speaking` once the first
    /// byte has actually arrived (needed to compute real TTFB).
    async fn run_speaking(
        &self,
        turn_id: Uuid,
        reply_text: String,
        llm_ms: f64,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<VoiceEvent>,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) {
        let (tts_tx, mut tts_rx) = mpsc::channel::<Vec<u8>>(64);
        let tts = self.tts.clone();
        let synth_cancel = cancel.clone();
        let synth_text = reply_text.clone();
        let synth_handle = tokio::spawn(async move { tts.synthesize(&synth_text, &synth_cancel, tts_tx).await });

        let t0 = Instant::now();
        let mut first_byte = true;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = tts_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            if first_byte {
                                first_byte = false;
                                let ttfb_ms = t0.elapsed().as_secs_f64() * 1000.0;
                                let mut g = self.inner.lock().await;
                                if g.current_turn != Some(turn_id) {
                                    drop(g);
                                    cancelled = true;
                                    break;
                                }
                                g.phase = TurnPhase::Speaking;
                                drop(g);
                                let _ = event_tx
                                    .send(VoiceEvent::VoiceAssistantAudioStart {
                                        turn_id,
                                        llm_ms,
                                        tts_ttfb_ms: ttfb_ms,
                                    })
                                    .await;
                            }
                            if audio_tx.send(bytes).await.is_err() {
                                cancelled = true;
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = synth_handle.await;
        if cancelled {
            return;
        }

        let mut g = self.inner.lock().await;
        if g.current_turn != Some(turn_id) {
            return;
        }
        g.history.push(MessageRole::Assistant, reply_text);
        g.history.trim(g.max_history_turns);
        g.current_turn = None;
        g.cancel = None;
        g.phase = TurnPhase::Listening;
        drop(g);

        let _ = event_tx
            .send(VoiceEvent::VoiceAssistantAudioEnd {
                turn_id,
                reason: EndReason::Completed,
            })
            .await;
        let _ = event_tx
            .send(VoiceEvent::VoiceState {
                state: TurnPhase::Listening,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stt_core::domain::turn::HistoryMessage;
    use tokio::sync::Notify;
    use tokio::time::{Duration as TokioDuration, sleep, timeout};

    struct EchoLlm;
    #[async_trait]
    impl LlmProvider for EchoLlm {
        async fn complete(
            &self,
            history: &[HistoryMessage],
            _cancel: &CancellationToken,
        ) -> Result<String, GatewayError> {
            Ok(format!("reply to {}", history.last().map(|m| m.content.as_str()).unwrap_or("")))
        }
    }

    /// LLM that blocks until released, so a test can race a barge-in
    /// against its completion (S6).
    struct StallingLlm {
        release: Arc<Notify>,
    }
    #[async_trait]
    impl LlmProvider for StallingLlm {
        async fn complete(
            &self,
            _history: &[HistoryMessage],
            cancel: &CancellationToken,
        ) -> Result<String, GatewayError> {
            tokio::select! {
                () = self.release.notified() => Ok("late reply".to_string()),
                () = cancel.cancelled() => Err(GatewayError::Cancelled),
            }
        }
    }

    struct InstantTts;
    #[async_trait]
    impl TtsProvider for InstantTts {
        async fn synthesize(
            &self,
            _text: &str,
            cancel: &CancellationToken,
            audio_tx: mpsc::Sender<Vec<u8>>,
        ) -> Result<stt_core::ports::TtsStats, GatewayError> {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let _ = audio_tx.send(vec![1, 2, 3, 4]).await;
            Ok(stt_core::ports::TtsStats { ttfb_ms: 1.0 })
        }
    }

    struct CountingTts(Arc<AtomicUsize>);
    #[async_trait]
    impl TtsProvider for CountingTts {
        async fn synthesize(
            &self,
            _text: &str,
            _cancel: &CancellationToken,
            audio_tx: mpsc::Sender<Vec<u8>>,
        ) -> Result<stt_core::ports::TtsStats, GatewayError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let _ = audio_tx.send(vec![9, 9]).await;
            Ok(stt_core::ports::TtsStats { ttfb_ms: 0.5 })
        }
    }

    fn machine(llm: Arc<dyn LlmProvider>, tts: Arc<dyn TtsProvider>) -> VoiceTurnMachine {
        VoiceTurnMachine::new(Some("system".into()), 20, llm, tts, TurnTimeouts::default())
    }

    async fn drain_until_audio_end(rx: &mut mpsc::Receiver<VoiceEvent>) -> VoiceEvent {
        loop {
            let ev = timeout(TokioDuration::from_secs(1), rx.recv())
                .await
                .expect("event expected")
                .expect("channel open");
            if matches!(ev, VoiceEvent::VoiceAssistantAudioEnd { .. }) {
                return ev;
            }
        }
    }

    #[tokio::test]
    async fn full_turn_emits_audio_start_then_completed_end() {
        let m = machine(Arc::new(EchoLlm), Arc::new(InstantTts));
        let (etx, mut erx) = mpsc::channel(32);
        let (atx, mut arx) = mpsc::channel(32);

        let turn_id = m.on_final_transcript("hello".into(), etx, atx).await;
        let end = drain_until_audio_end(&mut erx).await;
        match end {
            VoiceEvent::VoiceAssistantAudioEnd { turn_id: t, reason } => {
                assert_eq!(t, turn_id);
                assert_eq!(reason, EndReason::Completed);
            }
            _ => unreachable!(),
        }
        assert_eq!(arx.recv().await, Some(vec![1, 2, 3, 4]));
        assert_eq!(m.phase().await, TurnPhase::Listening);
    }

    /// S5 — barge-in while speaking yields exactly one audio_end, and the
    /// next turn's events only ever reference the new turn id.
    #[tokio::test]
    async fn barge_in_while_speaking_ends_old_turn_once() {
        let m = machine(Arc::new(EchoLlm), Arc::new(InstantTts));
        let (etx, mut erx) = mpsc::channel(32);
        let (atx, _arx) = mpsc::channel(32);

        let turn_a = m.on_final_transcript("first".into(), etx.clone(), atx.clone()).await;
        // Let turn A reach `speaking` (InstantTts resolves immediately).
        sleep(TokioDuration::from_millis(20)).await;

        let turn_b = m.on_final_transcript("second".into(), etx.clone(), atx.clone()).await;
        assert_ne!(turn_a, turn_b);

        let mut audio_end_count = 0;
        let mut saw_a_end = false;
        while audio_end_count < 2 {
            let ev = timeout(TokioDuration::from_secs(1), erx.recv())
                .await
                .expect("event expected")
                .expect("channel open");
            if let VoiceEvent::VoiceAssistantAudioEnd { turn_id, reason } = ev {
                audio_end_count += 1;
                if turn_id == turn_a {
                    assert_eq!(reason, EndReason::BargeIn);
                    saw_a_end = true;
                } else {
                    assert_eq!(turn_id, turn_b);
                    assert_eq!(reason, EndReason::Completed);
                }
            }
        }
        assert!(saw_a_end);
    }

    /// S6 — a stalled turn A's late LLM completion must not clobber the
    /// state established by turn B, which started and finished while A
    /// was still thinking.
    #[tokio::test]
    async fn late_llm_completion_after_supersede_is_discarded() {
        let release = Arc::new(Notify::new());
        let llm = Arc::new(StallingLlm { release: release.clone() });
        let tts_calls = Arc::new(AtomicUsize::new(0));
        let m = machine(llm, Arc::new(CountingTts(tts_calls.clone())));
        let (etx, mut erx) = mpsc::channel(32);
        let (atx, _arx) = mpsc::channel(32);

        let turn_a = m.on_final_transcript("A".into(), etx.clone(), atx.clone()).await;
        // Turn A is stuck in `thinking` (StallingLlm blocks on `release`).
        sleep(TokioDuration::from_millis(10)).await;
        assert_eq!(m.phase().await, TurnPhase::Thinking);

        let turn_b = m.on_final_transcript("B".into(), etx.clone(), atx.clone()).await;
        let end = drain_until_audio_end(&mut erx).await;
        assert!(matches!(end, VoiceEvent::VoiceAssistantAudioEnd { turn_id, .. } if turn_id == turn_b));
        assert_eq!(m.phase().await, TurnPhase::Listening);

        // Now let A's stalled LLM call resolve — it must be a no-op.
        release.notify_one();
        sleep(TokioDuration::from_millis(20)).await;
        assert_eq!(m.phase().await, TurnPhase::Listening);
        assert_eq!(tts_calls.load(Ordering::SeqCst), 1, "A's late reply must never reach TTS");
        let _ = turn_a;
    }

    #[tokio::test]
    async fn stop_speaking_while_thinking_reports_stopped_with_no_audio() {
        let release = Arc::new(Notify::new());
        let llm = Arc::new(StallingLlm { release });
        let m = machine(llm, Arc::new(InstantTts));
        let (etx, mut erx) = mpsc::channel(32);
        let (atx, _arx) = mpsc::channel(32);

        let turn_id = m.on_final_transcript("hi".into(), etx.clone(), atx).await;
        sleep(TokioDuration::from_millis(10)).await;
        m.on_command(VoiceCommand::BargeIn, etx.clone()).await;

        let end = drain_until_audio_end(&mut erx).await;
        match end {
            VoiceEvent::VoiceAssistantAudioEnd { turn_id: t, reason } => {
                assert_eq!(t, turn_id);
                assert_eq!(reason, EndReason::Stopped);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn reset_history_keeps_system_message_only() {
        let m = machine(Arc::new(EchoLlm), Arc::new(InstantTts));
        let (etx, mut erx) = mpsc::channel(32);
        let (atx, _arx) = mpsc::channel(32);
        let _ = m.on_final_transcript("hello".into(), etx.clone(), atx).await;
        let _ = drain_until_audio_end(&mut erx).await;

        m.on_command(VoiceCommand::ResetHistory, etx).await;
        let g = m.inner.lock().await;
        assert_eq!(g.history.messages().len(), 1);
        assert_eq!(g.history.messages()[0].role, MessageRole::System);
    }
}
