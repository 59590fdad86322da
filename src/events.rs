//! Client-facing event schema and the sink they are delivered to.
//!
//! Events are JSON objects tagged by `type`. Audio bytes travel base64-encoded
//! inside the JSON; the transport carrying them is the caller's concern.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SpeechError;
use crate::speech::{CharTimestamp, Sentence, SentenceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One increment of the AI text stream, forwarded as received.
    #[serde(rename = "text_chunk")]
    TextChunk { content: String },

    #[serde(rename = "sentence_start")]
    SentenceStart {
        #[serde(rename = "sentenceId")]
        sentence_id: SentenceId,
        text: String,
    },

    #[serde(rename = "audio_chunk")]
    AudioChunk {
        #[serde(rename = "sentenceId")]
        sentence_id: SentenceId,
        #[serde(rename = "chunkIndex")]
        chunk_index: usize,
        /// Base64-encoded audio in the negotiated format.
        audio: String,
        /// Always false: finality is signaled by `sentence_complete`.
        #[serde(rename = "isLast")]
        is_last: bool,
    },

    #[serde(rename = "sentence_complete")]
    SentenceComplete {
        #[serde(rename = "sentenceId")]
        sentence_id: SentenceId,
        text: String,
        timestamps: Vec<CharTimestamp>,
        #[serde(rename = "totalDurationMs")]
        total_duration_ms: u64,
        #[serde(rename = "chunkCount")]
        chunk_count: usize,
        #[serde(rename = "audioBytes")]
        audio_bytes: usize,
        /// Wall-clock time between sentence start and end.
        #[serde(rename = "elapsedMs")]
        elapsed_ms: u64,
    },

    #[serde(rename = "chat_complete")]
    ChatComplete {
        #[serde(rename = "fullText")]
        full_text: String,
        #[serde(rename = "sentenceCount")]
        sentence_count: usize,
    },

    /// Terminal failure. At most one per processed turn.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ClientEvent {
    pub fn audio_chunk(sentence_id: SentenceId, chunk_index: usize, data: &[u8]) -> Self {
        Self::AudioChunk {
            sentence_id,
            chunk_index,
            audio: base64::engine::general_purpose::STANDARD.encode(data),
            is_last: false,
        }
    }

    pub fn sentence_complete(sentence: &Sentence) -> Self {
        Self::SentenceComplete {
            sentence_id: sentence.id(),
            text: sentence.text().to_string(),
            timestamps: sentence.timestamps().to_vec(),
            total_duration_ms: sentence.total_duration_ms(),
            chunk_count: sentence.chunks().len(),
            audio_bytes: sentence.audio_len(),
            elapsed_ms: sentence.elapsed().as_millis() as u64,
        }
    }

    pub fn error(error: &SpeechError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    /// Decoded audio bytes of an `audio_chunk` event.
    pub fn audio_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::AudioChunk { audio, .. } => base64::engine::general_purpose::STANDARD.decode(audio).ok(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextChunk { .. } => "text_chunk",
            Self::SentenceStart { .. } => "sentence_start",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::SentenceComplete { .. } => "sentence_complete",
            Self::ChatComplete { .. } => "chat_complete",
            Self::Error { .. } => "error",
        }
    }
}

// ── Sink ──────────────────────────────────────────────────────────

/// Destination for client-facing events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are logged by the caller and do
    /// not abort the session.
    async fn emit(&self, event: ClientEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<ClientEvent> {
    async fn emit(&self, event: ClientEvent) -> anyhow::Result<()> {
        self.send(event)
            .await
            .map_err(|e| anyhow::anyhow!("event receiver dropped ({})", e.0.kind()))
    }
}
