//! Sentence records.
//!
//! While the backend streams a sentence, its mutable fields live in a
//! [`SentenceBuilder`] owned by the tracker. `finish` turns the builder into an
//! immutable [`Sentence`] that readers may share freely.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assembler::{assemble, AssembledAudio};
use super::timestamps::{CharTimestamp, Timeline};

/// Sentence identifier. Unique within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentenceId(pub i64);

impl fmt::Display for SentenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceStatus {
    /// Started, no audio yet.
    Pending,
    /// At least one audio fragment received.
    Collecting,
    Completed,
}

/// One ordered fragment of a sentence's audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Arrival order within the sentence, starting at 0.
    pub index: usize,
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Mutable per-sentence working state.
#[derive(Debug)]
pub struct SentenceBuilder {
    id: SentenceId,
    text: String,
    chunks: Vec<AudioChunk>,
    status: SentenceStatus,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SentenceBuilder {
    pub fn new(id: SentenceId, text: String) -> Self {
        Self {
            id,
            text,
            chunks: Vec::new(),
            status: SentenceStatus::Pending,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> SentenceId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> SentenceStatus {
        self.status
    }

    /// Replace the source text (sentence-start carried none).
    pub fn with_text(mut self, text: String) -> Self {
        self.text = text;
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append an audio fragment and return its index.
    pub fn push_chunk(&mut self, data: Vec<u8>) -> usize {
        let index = self.chunks.len();
        self.chunks.push(AudioChunk {
            index,
            data,
            received_at: Utc::now(),
        });
        self.status = SentenceStatus::Collecting;
        index
    }

    /// Wall-clock time since the sentence started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Freeze into an immutable, completed sentence.
    pub fn finish(self, timeline: Timeline) -> Sentence {
        let elapsed = self.started.elapsed();
        Sentence {
            id: self.id,
            text: self.text,
            chunks: self.chunks,
            timestamps: timeline.chars,
            total_duration_ms: timeline.total_duration_ms,
            started_at: self.started_at,
            elapsed,
        }
    }
}

/// Completed, immutable sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    id: SentenceId,
    text: String,
    chunks: Vec<AudioChunk>,
    timestamps: Vec<CharTimestamp>,
    total_duration_ms: u64,
    started_at: DateTime<Utc>,
    elapsed: Duration,
}

impl Sentence {
    pub fn id(&self) -> SentenceId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> SentenceStatus {
        SentenceStatus::Completed
    }

    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    pub fn timestamps(&self) -> &[CharTimestamp] {
        &self.timestamps
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time between sentence start and sentence end.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Merged audio of all chunks.
    pub fn audio(&self) -> AssembledAudio {
        assemble(&self.chunks)
    }

    pub fn audio_len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}
