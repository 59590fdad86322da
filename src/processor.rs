//! Server-streaming audio/text processor.
//!
//! Drives one conversation turn end to end:
//!
//! ```text
//! AI text stream ──▸ text_chunk events + task frames ──▸ backend
//! backend frames ──▸ demux ──▸ SentenceTracker ──▸ sentence/audio events
//! ```
//!
//! The two halves run concurrently and are joined: the turn is drained only
//! when the text stream has ended AND the backend reported session-finished.
//! Only then are chat_complete, finish-session and finish-connection sent.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::TtsConfig;
use crate::error::SpeechError;
use crate::events::{ClientEvent, EventSink};
use crate::session::{
    BackendEvent, SessionState, SessionWriter, SharedState, SpeechSession, StateMachine, SynthesisConnection,
};
use crate::speech::{AssembledAudio, Sentence, SentenceId, SentenceStore, SentenceTracker, TimestampSynthesizer};

/// Outcome of one successfully processed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSummary {
    pub session_id: String,
    pub full_text: String,
    /// Sentence-start events observed.
    pub sentence_count: usize,
    /// Sentences that reached `completed`.
    pub completed_sentences: usize,
    pub audio_bytes: usize,
}

pub struct ServerStreamingAudioTextProcessor {
    config: TtsConfig,
    synthesizer: TimestampSynthesizer,
    store: SentenceStore,
    last_state: parking_lot::Mutex<Option<SharedState>>,
}

impl ServerStreamingAudioTextProcessor {
    pub fn new(config: TtsConfig) -> Self {
        let synthesizer = TimestampSynthesizer::new(config.default_sentence_duration_ms);
        Self {
            config,
            synthesizer,
            store: SentenceStore::new(),
            last_state: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TtsConfig {
        &self.config
    }

    /// State of the most recent turn's connection; `Disconnected` before the first turn.
    pub fn session_state(&self) -> SessionState {
        self.last_state
            .lock()
            .as_ref()
            .map_or(SessionState::Disconnected, |state| state.lock().state())
    }

    pub fn completed_sentence(&self, id: SentenceId) -> Option<Arc<Sentence>> {
        self.store.get(id)
    }

    /// Completed sentences of the most recent turn, in completion order.
    pub fn completed_sentences(&self) -> Vec<Arc<Sentence>> {
        self.store.all()
    }

    /// Assembled audio of a completed sentence.
    pub fn sentence_audio(&self, id: SentenceId) -> Option<AssembledAudio> {
        self.store.get(id).map(|sentence| sentence.audio())
    }

    /// Process one turn: stream `text_stream` into a fresh synthesis session
    /// and deliver client events to `sink` until the session is finished.
    ///
    /// A failed turn emits exactly one `error` event and returns the error.
    /// Cancelling `cancel` aborts the turn; partial sentences are discarded.
    pub async fn process<S>(
        &self,
        text_stream: S,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> Result<ChatSummary, SpeechError>
    where
        S: Stream<Item = String> + Send,
    {
        let session_id = uuid::Uuid::new_v4().to_string();
        let state: SharedState = Arc::new(parking_lot::Mutex::new(StateMachine::new(session_id.clone())));
        *self.last_state.lock() = Some(Arc::clone(&state));
        self.store.clear();

        tracing::info!(session_id = %session_id, speaker = %self.config.speaker, "Processing turn");

        match self.run(&session_id, &state, text_stream, sink, &cancel).await {
            Ok(summary) => {
                tracing::info!(
                    session_id = %session_id,
                    sentences = summary.sentence_count,
                    audio_bytes = summary.audio_bytes,
                    "Turn complete"
                );
                Ok(summary)
            }
            Err(e) => {
                state.lock().fail(&e.to_string());
                tracing::error!(session_id = %session_id, code = e.code(), error = %e, "Turn failed");
                emit(sink, ClientEvent::error(&e)).await;
                Err(e)
            }
        }
    }

    async fn run<S>(
        &self,
        session_id: &str,
        state: &SharedState,
        text_stream: S,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<ChatSummary, SpeechError>
    where
        S: Stream<Item = String> + Send,
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            r = self.open(session_id, state) => r,
        };
        let mut session = opened?;
        let writer = session.writer();
        tracing::debug!(
            session_id = %session_id,
            connection_id = session.connection_id().unwrap_or("-"),
            "Streaming text into session"
        );

        let mut tracker = SentenceTracker::new(session_id, self.synthesizer, self.store.clone());
        let mut full_text = String::new();
        let (text_done_tx, text_done_rx) = oneshot::channel::<()>();

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            r = async {
                tokio::try_join!(
                    async {
                        forward_text(text_stream, &writer, sink, &mut full_text).await?;
                        let _ = text_done_tx.send(());
                        Ok::<(), SpeechError>(())
                    },
                    track_events(&mut session, &mut tracker, sink, text_done_rx),
                )
            } => r,
        };

        if let Err(e) = joined {
            tracker.discard_partial();
            session.abort(&e.to_string()).await;
            return Err(e);
        }

        tracing::debug!(session_id = %session_id, "Text stream and backend session both drained");
        let sentence_count = tracker.sentence_count();

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            r = async {
                emit(
                    sink,
                    ClientEvent::ChatComplete {
                        full_text: full_text.clone(),
                        sentence_count,
                    },
                )
                .await;
                session.finish().await
            } => r,
        };

        if let Err(e) = finished {
            session.abort(&e.to_string()).await;
            return Err(e);
        }

        let completed = self.store.all();
        Ok(ChatSummary {
            session_id: session_id.to_string(),
            full_text,
            sentence_count,
            completed_sentences: completed.len(),
            audio_bytes: completed.iter().map(|s| s.audio_len()).sum(),
        })
    }

    async fn open(&self, session_id: &str, state: &SharedState) -> Result<SpeechSession, SpeechError> {
        let connection = SynthesisConnection::connect(&self.config, session_id.to_string(), Arc::clone(state)).await?;
        connection.open_session(&self.config).await
    }
}

fn cancelled() -> SpeechError {
    SpeechError::SessionAborted("cancelled by caller".into())
}

async fn emit(sink: &dyn EventSink, event: ClientEvent) {
    let kind = event.kind();
    if let Err(e) = sink.emit(event).await {
        tracing::warn!(event = kind, error = %e, "Failed to deliver client event");
    }
}

/// Writer half: forward every text increment to the client and the backend.
async fn forward_text<S>(
    text_stream: S,
    writer: &SessionWriter,
    sink: &dyn EventSink,
    full_text: &mut String,
) -> Result<(), SpeechError>
where
    S: Stream<Item = String> + Send,
{
    let mut text_stream = std::pin::pin!(text_stream);
    let mut increments = 0usize;
    while let Some(chunk) = text_stream.next().await {
        if chunk.is_empty() {
            continue;
        }
        increments += 1;
        full_text.push_str(&chunk);
        emit(sink, ClientEvent::TextChunk { content: chunk.clone() }).await;
        writer.submit_text(&chunk).await?;
    }
    tracing::debug!(
        session_id = %writer.session_id(),
        increments,
        chars = full_text.chars().count(),
        "Text stream ended"
    );
    Ok(())
}

/// Reader half: drive the sentence tracker until the backend finishes the
/// session, then keep watching the connection until the writer half is done.
async fn track_events(
    session: &mut SpeechSession,
    tracker: &mut SentenceTracker,
    sink: &dyn EventSink,
    mut text_done: oneshot::Receiver<()>,
) -> Result<(), SpeechError> {
    loop {
        let Some(item) = session.next_event().await else {
            return Err(SpeechError::SessionAborted(
                "backend stream ended before session finished".into(),
            ));
        };

        match item? {
            BackendEvent::SentenceStart { sequence, payload } => {
                let started = tracker.on_sentence_start(sequence, &payload);
                emit(
                    sink,
                    ClientEvent::SentenceStart {
                        sentence_id: started.id,
                        text: started.text,
                    },
                )
                .await;
            }
            BackendEvent::AudioFragment { data } => {
                let event_data = data.clone();
                if let Some(fragment) = tracker.on_audio_fragment(data) {
                    emit(
                        sink,
                        ClientEvent::audio_chunk(fragment.sentence_id, fragment.index, &event_data),
                    )
                    .await;
                }
            }
            BackendEvent::SentenceEnd { payload } => {
                if let Some(sentence) = tracker.on_sentence_end(&payload) {
                    emit(sink, ClientEvent::sentence_complete(&sentence)).await;
                }
            }
            BackendEvent::SessionFinished { .. } => {
                tracker.discard_partial();
                tracing::debug!(
                    session_id = %session.session_id(),
                    sentences = tracker.sentence_count(),
                    "Backend finished session"
                );
                break;
            }
            event @ (BackendEvent::Failure { .. } | BackendEvent::ConnectionFinished) => {
                return Err(unexpected_end(event, "before session finished"));
            }
            BackendEvent::SessionStarted | BackendEvent::ConnectionStarted { .. } => {
                tracing::debug!(session_id = %session.session_id(), "Backend acknowledged session");
            }
        }
    }

    // The writer half may still be waiting on the text stream; a socket
    // failure in that window must still end the turn.
    loop {
        tokio::select! {
            biased;
            Ok(()) = &mut text_done => return Ok(()),
            item = session.next_event() => match item {
                None => {
                    return Err(SpeechError::SessionAborted(
                        "backend stream ended while waiting for the text stream".into(),
                    ));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(event @ (BackendEvent::Failure { .. } | BackendEvent::ConnectionFinished))) => {
                    return Err(unexpected_end(event, "after session finished"));
                }
                Some(Ok(other)) => {
                    tracing::debug!(
                        session_id = %session.session_id(),
                        event = ?other,
                        "Ignoring backend event after session finished"
                    );
                }
            },
        }
    }
}

fn unexpected_end(event: BackendEvent, phase: &str) -> SpeechError {
    match event {
        BackendEvent::Failure { event, code, message } => SpeechError::SessionAborted(format!(
            "backend reported {event:?} {phase} (code {}): {message}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
        )),
        other => SpeechError::SessionAborted(format!("backend sent {other:?} {phase}")),
    }
}
