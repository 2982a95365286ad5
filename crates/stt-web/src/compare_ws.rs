//! `/ws/compare` — the compare-mode WebSocket handler.
//!
//! Structural pattern: split the socket into an ingest half (read client
//! frames, decode, forward into the session) and an egress half (drain
//! the session's outgoing message channel, serialize, write), each its
//! own task, joined so either side finishing tears down the other.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use stt_core::codec::decode_frame;
use stt_core::domain::options::StreamingOptions;
use stt_core::ports::AudioMeta;

use crate::compare_session::CompareSession;
use crate::state::AppState;
use crate::wire::{CompareConfigMessage, CompareServerMessage};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state))
}

async fn handle(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let config = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<CompareConfigMessage>(&text) {
            Ok(c) if c.kind == "config" => c,
            Ok(_) => {
                send_protocol_error(&mut sender, "first message must have type 'config'").await;
                return;
            }
            Err(err) => {
                send_protocol_error(&mut sender, &format!("malformed config message: {err}")).await;
                return;
            }
        },
        _ => {
            send_protocol_error(&mut sender, "expected a text config message before audio").await;
            return;
        }
    };

    if config.pcm {
        match config.client_sample_rate {
            None => {
                send_protocol_error(&mut sender, "clientSampleRate is required when pcm=true").await;
                return;
            }
            Some(rate) if !(8000..=96_000).contains(&rate) => {
                send_protocol_error(&mut sender, "clientSampleRate must lie in [8000, 96000]").await;
                return;
            }
            Some(_) => {}
        }
    }

    let opts = StreamingOptions {
        language: config.language.clone().unwrap_or_else(|| "en-US".to_string()),
        sample_rate: config.client_sample_rate.unwrap_or(16_000),
        encoding: "pcm16le".to_string(),
        enable_interim: config.enable_interim,
        enable_diarization: config.options.enable_diarization,
        punctuation_policy: config.options.punctuation_policy.unwrap_or_default(),
        dictionary_phrases: config.options.dictionary_phrases.clone(),
        context_phrases: config.context_phrases.clone(),
        enable_vad: config.options.enable_vad,
        normalize_preset: config.normalize_preset.clone(),
        parallel: config.options.parallel.unwrap_or(1),
    };

    let (out_tx, mut out_rx) = mpsc::channel::<CompareServerMessage>(256);

    let session = match CompareSession::start(
        &state,
        config.providers.clone(),
        opts,
        config.options.meeting_mode,
        out_tx,
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            send_protocol_error(&mut sender, &err.to_string()).await;
            return;
        }
    };

    let egress = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(bytes) => match decode_frame(&bytes) {
                Ok(frame) => {
                    let meta = AudioMeta {
                        capture_ts: frame.capture_ts,
                        seq: frame.seq,
                    };
                    if session.ingest_frame(frame.pcm, meta, false).await {
                        // Soft backpressure (§4.5 step 5): hold off reading
                        // the next client frame until every adapter queue
                        // has drained back down.
                        session.wait_for_drain().await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed compare-mode frame");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // `close` consumes the session, dropping its `out_tx` handle once it
    // returns; the egress task's `recv()` then drains any buffered
    // messages (including `session_end`) and exits on its own once the
    // channel is empty and closed, rather than racing an abort against
    // delivery of the final message.
    session.close().await;
    let _ = egress.await;
}

async fn send_protocol_error(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &str,
) {
    let payload = CompareServerMessage::Error {
        provider: None,
        message: message.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}
