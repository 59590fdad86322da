//! Receive demultiplexer: the single reader of the synthesis socket.
//!
//! Pulls WebSocket messages, decodes them into frames and classifies each
//! frame into a [`BackendEvent`]. Unknown event kinds are logged and skipped;
//! any other decode failure or socket error ends the loop with one terminal
//! error on the channel.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::error::{ProtocolError, SpeechError};
use crate::protocol::{decode, EventKind, Frame, Payload};

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    ConnectionStarted { connection_id: Option<String> },
    SessionStarted,
    SentenceStart { sequence: Option<i32>, payload: String },
    AudioFragment { data: Vec<u8> },
    SentenceEnd { payload: String },
    /// Backend finished the session (no more sentences will follow).
    SessionFinished { payload: String },
    ConnectionFinished,
    /// Backend-declared failure: connection/session failed or canceled, or an error frame.
    Failure {
        event: EventKind,
        code: Option<u32>,
        message: String,
    },
}

/// Item delivered by the reader loop.
pub type InboundItem = Result<BackendEvent, SpeechError>;

/// Route a decoded frame by event kind. `None` for frames that carry nothing
/// for downstream consumers (echoed client events).
pub fn classify(frame: Frame) -> Option<BackendEvent> {
    let Frame {
        event,
        sequence,
        id,
        error_code,
        payload,
    } = frame;

    let text = match payload {
        Payload::Control(text) => text,
        Payload::Audio(data) => {
            return (event == EventKind::AudioResponse).then_some(BackendEvent::AudioFragment { data });
        }
    };

    match event {
        EventKind::ConnectionStarted => Some(BackendEvent::ConnectionStarted { connection_id: id }),
        EventKind::SessionStarted => Some(BackendEvent::SessionStarted),
        EventKind::SentenceStart => Some(BackendEvent::SentenceStart {
            sequence,
            payload: text,
        }),
        EventKind::SentenceEnd => Some(BackendEvent::SentenceEnd { payload: text }),
        EventKind::SessionFinished => Some(BackendEvent::SessionFinished { payload: text }),
        EventKind::ConnectionFinished => Some(BackendEvent::ConnectionFinished),
        EventKind::ConnectionFailed
        | EventKind::SessionFailed
        | EventKind::SessionCanceled
        | EventKind::ServerError => Some(BackendEvent::Failure {
            event,
            code: error_code,
            message: failure_message(&text),
        }),
        EventKind::AudioResponse => None,
        EventKind::StartConnection
        | EventKind::FinishConnection
        | EventKind::StartSession
        | EventKind::CancelSession
        | EventKind::FinishSession
        | EventKind::TaskRequest => None,
    }
}

fn failure_message(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| {
            ["message", "error", "status_text"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| payload.to_string())
}

/// Decode one WebSocket message. `Ok(None)` for messages to skip.
pub fn demux_message(message: WsMessage) -> Result<Option<BackendEvent>, SpeechError> {
    match message {
        WsMessage::Binary(data) => match decode(&data) {
            Ok(frame) => Ok(classify(frame)),
            Err(ProtocolError::UnknownEvent(code)) => {
                tracing::debug!(event = code, "Skipping frame with unknown event kind");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        },
        WsMessage::Text(text) => {
            tracing::warn!(len = text.len(), "Unexpected text frame from synthesis backend, skipping");
            Ok(None)
        }
        WsMessage::Close(frame) => Err(SpeechError::SessionAborted(format!(
            "connection closed by backend: {frame:?}"
        ))),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(None),
    }
}

/// Reader loop. Runs until connection-finished, a terminal error, the end of
/// the stream, or the receiver being dropped.
pub async fn run_reader<S>(mut stream: S, tx: mpsc::Sender<InboundItem>, session_id: String)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut audio_fragments: u64 = 0;

    while let Some(message) = stream.next().await {
        let item = match message {
            Ok(message) => demux_message(message),
            Err(e) => Err(SpeechError::SessionAborted(format!("websocket error: {e}"))),
        };

        match item {
            Ok(None) => continue,
            Ok(Some(event)) => {
                if let BackendEvent::AudioFragment { data } = &event {
                    audio_fragments += 1;
                    tracing::trace!(
                        session_id = %session_id,
                        bytes = data.len(),
                        fragment = audio_fragments,
                        "⬇ audio fragment"
                    );
                } else {
                    tracing::debug!(session_id = %session_id, event = event_name(&event), "⬇ backend event");
                }
                let done = matches!(event, BackendEvent::ConnectionFinished);
                if tx.send(Ok(event)).await.is_err() {
                    tracing::debug!(session_id = %session_id, "Event receiver dropped, closing reader");
                    return;
                }
                if done {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Reader loop terminated");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    tracing::debug!(session_id = %session_id, audio_fragments, "Reader loop finished");
}

fn event_name(event: &BackendEvent) -> &'static str {
    match event {
        BackendEvent::ConnectionStarted { .. } => "connection_started",
        BackendEvent::SessionStarted => "session_started",
        BackendEvent::SentenceStart { .. } => "sentence_start",
        BackendEvent::AudioFragment { .. } => "audio_fragment",
        BackendEvent::SentenceEnd { .. } => "sentence_end",
        BackendEvent::SessionFinished { .. } => "session_finished",
        BackendEvent::ConnectionFinished => "connection_finished",
        BackendEvent::Failure { .. } => "failure",
    }
}
