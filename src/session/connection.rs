//! Persistent connection to the synthesis backend.
//!
//! ## Lifecycle
//!
//! 1. **Connect**: open the WebSocket with auth headers, send connection-start
//! 2. **Handshake**: wait (bounded) for connection-started on the unsplit stream
//! 3. **Open**: send session-start, split the socket, spawn the reader loop
//! 4. **Stream**: task-submission frames through [`SessionWriter`], inbound
//!    events through [`SpeechSession::next_event`]
//! 5. **Finish**: finish-session, finish-connection, wait for connection-finished,
//!    close the socket
//!
//! Every failure drives the shared [`StateMachine`] to `Failed` and releases
//! the socket. No reconnection is attempted here.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::demux::{demux_message, run_reader, BackendEvent, InboundItem};
use super::state::{SessionState, StateMachine};
use crate::config::TtsConfig;
use crate::error::SpeechError;
use crate::protocol::{encode, messages, Frame};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// State machine shared between the connection and its observers.
pub type SharedState = Arc<parking_lot::Mutex<StateMachine>>;

/// Bound on the best-effort close performed when aborting.
const ABORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Inbound event channel capacity (audio fragments dominate).
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Handshake phase ────────────────────────────────────────────────

/// A connection that completed the connection-start handshake.
pub struct SynthesisConnection {
    ws: WsStream,
    state: SharedState,
    connection_id: Option<String>,
    session_id: String,
}

impl SynthesisConnection {
    /// Connect to the backend and complete the connection handshake.
    ///
    /// The config is validated first; a `Config` error means no socket was opened.
    pub async fn connect(
        config: &TtsConfig,
        session_id: String,
        state: SharedState,
    ) -> Result<Self, SpeechError> {
        config.validate()?;
        state.lock().transition(SessionState::Connecting)?;

        tracing::info!(
            session_id = %session_id,
            endpoint = %config.endpoint,
            speaker = %config.speaker,
            "Connecting to synthesis backend"
        );

        let request = build_request(config)?;
        let mut ws = match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                state.lock().fail("socket open failed");
                return Err(SpeechError::Transport(e));
            }
        };

        if let Err(e) = ws.send(binary(&messages::start_connection())).await {
            state.lock().fail("connection-start send failed");
            return Err(SpeechError::Transport(e));
        }
        state.lock().transition(SessionState::AwaitingConnectionAck)?;

        let timeout = config.handshake_timeout();
        let ack = tokio::time::timeout(timeout, wait_connection_started(&mut ws)).await;

        let failure = match ack {
            Ok(Ok(connection_id)) => {
                state.lock().transition(SessionState::ConnectionReady)?;
                tracing::info!(
                    session_id = %session_id,
                    connection_id = connection_id.as_deref().unwrap_or("-"),
                    "Synthesis connection ready"
                );
                return Ok(Self {
                    ws,
                    state,
                    connection_id,
                    session_id,
                });
            }
            Ok(Err(e)) => e,
            Err(_) => SpeechError::HandshakeTimeout(timeout),
        };

        state.lock().fail(&failure.to_string());
        let _ = tokio::time::timeout(ABORT_CLOSE_TIMEOUT, ws.close(None)).await;
        Err(failure)
    }

    /// Send session-start and hand the socket over to the reader loop.
    ///
    /// No session-started acknowledgment is awaited; text may be submitted
    /// immediately.
    pub async fn open_session(mut self, config: &TtsConfig) -> Result<SpeechSession, SpeechError> {
        let frame = messages::start_session(config, &self.session_id)?;
        if let Err(e) = self.ws.send(binary(&frame)).await {
            self.state.lock().fail("session-start send failed");
            let _ = tokio::time::timeout(ABORT_CLOSE_TIMEOUT, self.ws.close(None)).await;
            return Err(SpeechError::SessionAborted(format!("session-start send failed: {e}")));
        }
        self.state.lock().transition(SessionState::SessionOpen)?;

        tracing::info!(
            session_id = %self.session_id,
            format = %config.audio_format,
            sample_rate = config.sample_rate,
            "Synthesis session open"
        );

        let (sink, stream) = self.ws.split();
        let (event_tx, event_rx) = mpsc::channel::<InboundItem>(EVENT_CHANNEL_CAPACITY);
        let sid = self.session_id.clone();
        let reader = tokio::spawn(async move {
            run_reader(stream, event_tx, sid).await;
        });

        let writer = SessionWriter {
            sink: Arc::new(Mutex::new(sink)),
            config: Arc::new(config.clone()),
            session_id: self.session_id.clone(),
            state: Arc::clone(&self.state),
        };

        Ok(SpeechSession {
            writer,
            events: event_rx,
            reader,
            state: self.state,
            session_id: self.session_id,
            connection_id: self.connection_id,
            finish_timeout: config.finish_timeout(),
        })
    }
}

fn build_request(
    config: &TtsConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, SpeechError> {
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| SpeechError::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;

    let header = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| SpeechError::Config(format!("invalid header value: {e}")))
    };
    let headers = request.headers_mut();
    headers.insert("x-api-app-key", header(&config.app_id)?);
    headers.insert("x-api-access-key", header(&config.access_token)?);
    headers.insert("x-api-resource-id", header(&config.resource_id)?);
    headers.insert("x-api-connect-id", header(&uuid::Uuid::new_v4().to_string())?);
    Ok(request)
}

/// Read the unsplit stream until connection-started. Other frames are skipped.
async fn wait_connection_started(ws: &mut WsStream) -> Result<Option<String>, SpeechError> {
    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| SpeechError::SessionAborted(format!("websocket error during handshake: {e}")))?;
        match demux_message(message)? {
            Some(BackendEvent::ConnectionStarted { connection_id }) => return Ok(connection_id),
            Some(BackendEvent::Failure { message, code, .. }) => {
                return Err(SpeechError::SessionAborted(format!(
                    "connection rejected (code {}): {message}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
                )));
            }
            Some(other) => {
                tracing::debug!(event = ?other, "Ignoring frame before connection-started");
            }
            None => {}
        }
    }
    Err(SpeechError::SessionAborted("stream ended before connection-started".into()))
}

fn binary(frame: &Frame) -> WsMessage {
    WsMessage::Binary(encode(frame).into())
}

// ── Session phase ──────────────────────────────────────────────────

/// Write half of an open session. Cheap to clone.
#[derive(Clone)]
pub struct SessionWriter {
    sink: Arc<Mutex<WsSink>>,
    config: Arc<TtsConfig>,
    session_id: String,
    state: SharedState,
}

impl SessionWriter {
    /// Submit one text increment as a task-submission frame.
    pub async fn submit_text(&self, text: &str) -> Result<(), SpeechError> {
        if text.is_empty() {
            return Ok(());
        }
        self.state.lock().transition(SessionState::SessionOpen)?;
        let frame = messages::task_request(&self.config, &self.session_id, text)?;
        self.send(&frame).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, frame: &Frame) -> Result<(), SpeechError> {
        let mut sink = self.sink.lock().await;
        sink.send(binary(frame)).await.map_err(|e| {
            SpeechError::SessionAborted(format!("failed to send {:?} frame: {e}", frame.event))
        })
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(ABORT_CLOSE_TIMEOUT, sink.close()).await;
    }
}

/// An open synthesis session: writer handle, inbound event channel and the
/// reader task that feeds it.
pub struct SpeechSession {
    writer: SessionWriter,
    events: mpsc::Receiver<InboundItem>,
    reader: JoinHandle<()>,
    state: SharedState,
    session_id: String,
    connection_id: Option<String>,
    finish_timeout: Duration,
}

impl SpeechSession {
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().state()
    }

    /// Next classified inbound event; `None` once the reader loop has ended.
    pub async fn next_event(&mut self) -> Option<InboundItem> {
        self.events.recv().await
    }

    /// Send finish-session and finish-connection, wait for connection-finished
    /// and close the socket.
    ///
    /// Dropping this future midway leaves the session open for [`Self::abort`].
    pub async fn finish(&mut self) -> Result<(), SpeechError> {
        self.state.lock().transition(SessionState::SessionClosing)?;
        if let Err(e) = self.writer.send(&messages::finish_session(&self.session_id)).await {
            return Err(self.fail(e).await);
        }

        self.state.lock().transition(SessionState::ConnectionClosing)?;
        if let Err(e) = self.writer.send(&messages::finish_connection()).await {
            return Err(self.fail(e).await);
        }

        let timeout = self.finish_timeout;
        let ack = tokio::time::timeout(timeout, Self::wait_connection_finished(&mut self.events)).await;
        match ack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(e).await),
            Err(_) => {
                let e = SpeechError::SessionAborted(format!(
                    "connection-finished not acknowledged within {timeout:?}"
                ));
                return Err(self.fail(e).await);
            }
        }

        self.writer.close().await;
        self.reader.abort();
        self.state.lock().transition(SessionState::Closed)?;
        tracing::info!(session_id = %self.session_id, "Synthesis connection closed");
        Ok(())
    }

    /// Abort the session: force `Failed`, stop the reader, release the socket.
    /// An open session gets a best-effort cancel-session frame first.
    pub async fn abort(&mut self, reason: &str) {
        tracing::warn!(session_id = %self.session_id, reason = %reason, "Aborting synthesis session");
        let was_open = self.state.lock().state() == SessionState::SessionOpen;
        self.state.lock().fail(reason);
        if was_open {
            let cancel = messages::cancel_session(&self.session_id);
            let _ = tokio::time::timeout(ABORT_CLOSE_TIMEOUT, self.writer.send(&cancel)).await;
        }
        self.release().await;
    }

    async fn fail(&self, error: SpeechError) -> SpeechError {
        self.state.lock().fail(&error.to_string());
        self.release().await;
        error
    }

    async fn release(&self) {
        self.reader.abort();
        self.writer.close().await;
    }

    async fn wait_connection_finished(events: &mut mpsc::Receiver<InboundItem>) -> Result<(), SpeechError> {
        while let Some(item) = events.recv().await {
            match item? {
                BackendEvent::ConnectionFinished => return Ok(()),
                BackendEvent::Failure { event, message, .. } => {
                    return Err(SpeechError::SessionAborted(format!(
                        "backend reported {event:?} during teardown: {message}"
                    )));
                }
                other => {
                    tracing::debug!(event = ?other, "Ignoring frame during teardown");
                }
            }
        }
        Err(SpeechError::SessionAborted(
            "connection closed before connection-finished".into(),
        ))
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
