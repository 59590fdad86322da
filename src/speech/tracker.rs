//! Sentence lifecycle tracking: `pending → collecting → completed`.
//!
//! The tracker is driven only by the event loop of one session. Completed
//! sentences are moved into a [`SentenceStore`] that other tasks may read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::sentence::{Sentence, SentenceBuilder, SentenceId};
use super::timestamps::TimestampSynthesizer;
use crate::protocol::fields;

// ── Completed sentence store ───────────────────────────────────────

#[derive(Debug, Default)]
struct StoreInner {
    order: Vec<SentenceId>,
    by_id: HashMap<SentenceId, Arc<Sentence>>,
}

/// Completed sentences of one processor, in completion order. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SentenceStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl SentenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, sentence: Arc<Sentence>) {
        let mut inner = self.inner.write();
        let id = sentence.id();
        if inner.by_id.insert(id, sentence).is_none() {
            inner.order.push(id);
        }
    }

    pub fn get(&self, id: SentenceId) -> Option<Arc<Sentence>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Sentence>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.order.clear();
        inner.by_id.clear();
    }
}

// ── Tracker ────────────────────────────────────────────────────────

/// A sentence the backend just started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSentence {
    pub id: SentenceId,
    pub text: String,
}

/// An audio fragment accepted into the open sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedFragment {
    pub sentence_id: SentenceId,
    pub index: usize,
}

pub struct SentenceTracker {
    session_id: String,
    synthesizer: TimestampSynthesizer,
    current: Option<SentenceBuilder>,
    store: SentenceStore,
    used_ids: HashSet<SentenceId>,
    started: usize,
}

impl SentenceTracker {
    pub fn new(session_id: impl Into<String>, synthesizer: TimestampSynthesizer, store: SentenceStore) -> Self {
        Self {
            session_id: session_id.into(),
            synthesizer,
            current: None,
            store,
            used_ids: HashSet::new(),
            started: 0,
        }
    }

    /// Number of sentence-start events observed.
    pub fn sentence_count(&self) -> usize {
        self.started
    }

    pub fn store(&self) -> &SentenceStore {
        &self.store
    }

    pub fn has_open_sentence(&self) -> bool {
        self.current.is_some()
    }

    pub fn on_sentence_start(&mut self, sequence: Option<i32>, payload: &str) -> StartedSentence {
        if let Some(previous) = self.current.take() {
            tracing::warn!(
                session_id = %self.session_id,
                sentence_id = %previous.id(),
                chunks = previous.chunk_count(),
                "Sentence started before the previous one ended, discarding it"
            );
        }

        let parsed = parse_payload(payload);
        let text = parsed
            .as_ref()
            .and_then(|v| fields::SENTENCE_TEXT.extract(v))
            .unwrap_or_default();
        let candidate = sequence
            .map(i64::from)
            .or_else(|| parsed.as_ref().and_then(|v| fields::SENTENCE_ID.extract(v)));
        let id = self.allocate_id(candidate);

        self.started += 1;
        tracing::debug!(session_id = %self.session_id, sentence_id = %id, text = %text, "Sentence start");
        self.current = Some(SentenceBuilder::new(id, text.clone()));
        StartedSentence { id, text }
    }

    /// Append a fragment to the open sentence. Empty fragments and fragments
    /// outside a sentence are dropped.
    pub fn on_audio_fragment(&mut self, data: Vec<u8>) -> Option<AcceptedFragment> {
        if data.is_empty() {
            tracing::debug!(session_id = %self.session_id, "Dropping empty audio fragment");
            return None;
        }
        let Some(builder) = self.current.as_mut() else {
            tracing::warn!(
                session_id = %self.session_id,
                bytes = data.len(),
                "Audio fragment outside of a sentence, dropping"
            );
            return None;
        };
        let index = builder.push_chunk(data);
        Some(AcceptedFragment {
            sentence_id: builder.id(),
            index,
        })
    }

    /// Complete the open sentence. `None` if no sentence is open.
    pub fn on_sentence_end(&mut self, payload: &str) -> Option<Arc<Sentence>> {
        let Some(builder) = self.current.take() else {
            tracing::warn!(session_id = %self.session_id, "Sentence end without an open sentence");
            return None;
        };

        let elapsed = builder.elapsed();
        let timeline = self.synthesizer.synthesize(payload, builder.text());
        let text_from_payload = parse_payload(payload)
            .as_ref()
            .and_then(|v| fields::SENTENCE_TEXT.extract(v));

        let builder = match text_from_payload {
            Some(text) if builder.text().is_empty() => builder.with_text(text),
            _ => builder,
        };

        let source = timeline.source;
        let sentence = Arc::new(builder.finish(timeline));
        tracing::debug!(
            session_id = %self.session_id,
            sentence_id = %sentence.id(),
            source = ?source,
            chunks = sentence.chunks().len(),
            bytes = sentence.audio_len(),
            chars = sentence.timestamps().len(),
            duration_ms = sentence.total_duration_ms(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Sentence complete"
        );
        self.store.insert(Arc::clone(&sentence));
        Some(sentence)
    }

    /// Drop the open sentence without completing it.
    pub fn discard_partial(&mut self) {
        if let Some(builder) = self.current.take() {
            tracing::debug!(
                session_id = %self.session_id,
                sentence_id = %builder.id(),
                chunks = builder.chunk_count(),
                "Discarding partial sentence"
            );
        }
    }

    fn allocate_id(&mut self, candidate: Option<i64>) -> SentenceId {
        let mut id = SentenceId(candidate.unwrap_or_else(fallback_id));
        while self.used_ids.contains(&id) {
            id = SentenceId(id.0 + 1);
        }
        self.used_ids.insert(id);
        id
    }
}

/// Time-plus-random id, only unique enough within one session.
fn fallback_id() -> i64 {
    chrono::Utc::now().timestamp_millis() * 1000 + i64::from(rand::random::<u16>() % 1000)
}

fn parse_payload(payload: &str) -> Option<Value> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable sentence payload");
            None
        }
    }
}
