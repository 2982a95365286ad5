//! `/ws/voice` — the voice-agent WebSocket handler.
//!
//! Wires one STT provider adapter's finals into a [`VoiceTurnMachine`],
//! forwards its `VoiceEvent`s as JSON and its synthesized audio as binary
//! frames, and translates client `command` messages into turn-machine
//! commands.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use stt_agent::{TurnTimeouts, VoiceCommand, VoiceEvent, VoiceTurnMachine};
use stt_core::codec::decode_frame;
use stt_core::domain::options::{PunctuationPolicy, StreamingOptions};
use stt_core::domain::turn::TurnPhase;
use stt_core::ports::{AdapterEvent, AudioMeta};
use stt_providers::gate::{GateConfig, MeetingGate};

use crate::providers::find_adapter;
use crate::state::AppState;
use crate::wire::{CommandMessage, VoiceConfigMessage, VoiceServerMessage};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state))
}

async fn handle(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let config = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<VoiceConfigMessage>(&text) {
            Ok(c) if c.kind == "config" && c.pcm => c,
            Ok(_) => {
                send_error(&mut sender, None, "first message must be {type:'config', pcm:true}").await;
                return;
            }
            Err(err) => {
                send_error(&mut sender, None, &format!("malformed config message: {err}")).await;
                return;
            }
        },
        _ => {
            send_error(&mut sender, None, "expected a text config message before audio").await;
            return;
        }
    };

    if !(8000..=96_000).contains(&config.client_sample_rate) {
        send_error(&mut sender, None, "clientSampleRate must lie in [8000, 96000]").await;
        return;
    }

    let provider_id = config.provider.clone().unwrap_or_else(|| "mock".to_string());
    let availability = state.availability.get(&provider_id, false).await;
    if !availability.available {
        send_error(
            &mut sender,
            None,
            &availability.reason.unwrap_or_else(|| "provider unavailable".to_string()),
        )
        .await;
        return;
    }
    let Some(adapter) = find_adapter(&state.registry, &provider_id) else {
        send_error(&mut sender, None, "no adapter registered for this provider id").await;
        return;
    };

    let opts = StreamingOptions {
        language: config.language.clone().unwrap_or_else(|| "en-US".to_string()),
        sample_rate: config.client_sample_rate,
        encoding: "pcm16le".to_string(),
        enable_interim: config.enable_interim,
        enable_diarization: false,
        punctuation_policy: PunctuationPolicy::Basic,
        dictionary_phrases: Vec::new(),
        context_phrases: Vec::new(),
        enable_vad: false,
        normalize_preset: None,
        parallel: 1,
    };

    // Meeting mode (§4.2/§4.5 step 3) gates raw PCM before it ever reaches
    // the adapter, independent of `enable_vad` above (a per-provider
    // endpointing setting consumed only by the streaming adapters).
    let mut gate = config
        .options
        .meeting_mode
        .then(|| MeetingGate::new(GateConfig::default()));

    let (stt_events_tx, mut stt_events_rx) = mpsc::channel::<AdapterEvent>(128);
    let controller = match adapter.start_streaming(&opts, stt_events_tx).await {
        Ok(controller) => controller,
        Err(err) => {
            send_error(&mut sender, None, &err.to_string()).await;
            return;
        }
    };

    let turn_machine = VoiceTurnMachine::new(
        None,
        state.voice_history_max_turns,
        state.llm.clone(),
        state.tts.clone(),
        TurnTimeouts::default(),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<VoiceEvent>(64);
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);

    let session_msg = VoiceServerMessage::VoiceSession {
        session_id: Uuid::new_v4().to_string(),
        provider: provider_id,
        started_at: 0.0,
    };
    if let Ok(text) = serde_json::to_string(&session_msg) {
        let _ = sender.send(Message::Text(text.into())).await;
    }

    let egress = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    if let Ok(text) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(chunk) = audio_rx.recv() => {
                    if sender.send(Message::Binary(chunk.into())).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    let stt_forward = {
        let machine = turn_machine.clone();
        let event_tx = event_tx.clone();
        let audio_tx = audio_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = stt_events_rx.recv().await {
                match event {
                    AdapterEvent::Data(transcript) if transcript.is_final => {
                        machine
                            .on_final_transcript(transcript.text, event_tx.clone(), audio_tx.clone())
                            .await;
                    }
                    AdapterEvent::Data(_) => {}
                    AdapterEvent::Error(err) => {
                        let _ = event_tx
                            .send(VoiceEvent::Error {
                                turn_id: None,
                                message: err.to_string(),
                            })
                            .await;
                    }
                    AdapterEvent::Closed => break,
                }
            }
        })
    };

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(bytes) => match decode_frame(&bytes) {
                Ok(frame) => {
                    let meta = AudioMeta {
                        capture_ts: frame.capture_ts,
                        seq: frame.seq,
                    };
                    let allow = if let Some(gate) = gate.as_mut() {
                        let assistant_speaking = turn_machine.phase().await == TurnPhase::Speaking;
                        gate.process(&frame.pcm, frame.capture_ts, assistant_speaking).allow
                    } else {
                        true
                    };
                    if allow {
                        let _ = controller.send_audio(&frame.pcm, meta).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed voice-mode frame");
                }
            },
            Message::Text(text) => {
                if let Ok(cmd) = serde_json::from_str::<CommandMessage>(&text) {
                    if let Some(command) = parse_command(&cmd.name) {
                        turn_machine.on_command(command, event_tx.clone()).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = controller.end().await;
    controller.close().await;
    stt_forward.abort();
    let _ = stt_forward.await;
    egress.abort();
    let _ = egress.await;
}

fn parse_command(name: &str) -> Option<VoiceCommand> {
    match name {
        "barge_in" => Some(VoiceCommand::BargeIn),
        "stop_speaking" => Some(VoiceCommand::StopSpeaking),
        "reset_history" => Some(VoiceCommand::ResetHistory),
        _ => None,
    }
}

async fn send_error(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    turn_id: Option<Uuid>,
    message: &str,
) {
    let payload = VoiceEvent::Error {
        turn_id,
        message: message.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}
