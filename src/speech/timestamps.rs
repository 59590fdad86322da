//! Per-character timing for completed sentences.
//!
//! The sentence-end payload may carry word spans (seconds), explicit character
//! spans (milliseconds) or nothing usable. Sources are tried in that order and
//! the result always covers the whitespace-normalized sentence text, except for
//! explicit spans which are passed through as supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::fields;

/// Fixed width of an inter-word whitespace character.
const GAP_MS: f64 = 50.0;
/// Fixed width of a punctuation character next to a word span.
const PUNCT_MS: f64 = 100.0;
/// Width of text characters left over after all word spans are consumed.
const LEFTOVER_MS: f64 = 200.0;
/// Share of the even per-character width given to punctuation when estimating.
const PUNCT_SHARE: f64 = 0.3;

const CJK_PUNCTUATION: &str = "，。！？；：、“”‘’（）《》【】…—·「」";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharTimestamp {
    pub char: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Which timing source produced a [`Timeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSource {
    WordSpans,
    Explicit,
    /// Even estimate over a payload-supplied duration.
    Estimated,
    /// Even estimate over the configured default duration.
    #[default]
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    pub chars: Vec<CharTimestamp>,
    pub total_duration_ms: u64,
    pub source: TimingSource,
}

pub fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || CJK_PUNCTUATION.contains(c)
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn round_ms(ms: f64) -> u64 {
    ms.max(0.0).round() as u64
}

fn stamp(c: char, start: f64, end: f64) -> CharTimestamp {
    CharTimestamp {
        char: c.to_string(),
        start_ms: round_ms(start),
        end_ms: round_ms(end),
    }
}

#[derive(Debug, Clone)]
struct WordSpan {
    word: String,
    start_ms: f64,
    end_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TimestampSynthesizer {
    default_duration_ms: f64,
}

impl TimestampSynthesizer {
    pub fn new(default_duration_ms: u64) -> Self {
        Self {
            default_duration_ms: default_duration_ms as f64,
        }
    }

    /// Build the timeline for one sentence from its sentence-end payload.
    ///
    /// `sentence_text` is used when the payload does not carry the text itself.
    /// Unparseable payloads fall back to the default estimate.
    pub fn synthesize(&self, payload: &str, sentence_text: &str) -> Timeline {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return self.estimate(&normalize_text(sentence_text), None);
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Sentence-end payload is not valid JSON, estimating timestamps");
                return self.estimate(&normalize_text(sentence_text), None);
            }
        };

        let text = fields::SENTENCE_TEXT
            .extract(&value)
            .map(|t| normalize_text(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| normalize_text(sentence_text));

        if let Some(words) = fields::WORDS.extract(&value) {
            let spans = parse_word_spans(&words);
            if !spans.is_empty() {
                return from_word_spans(&spans, &text);
            }
        }

        if let Some(entries) = fields::CHAR_TIMESTAMPS.extract(&value) {
            let chars = parse_char_spans(&entries);
            if !chars.is_empty() {
                let max_end = chars.iter().map(|c| c.end_ms).max().unwrap_or(0);
                let total = fields::TOTAL_DURATION.extract(&value).map(round_ms).unwrap_or(max_end);
                return Timeline {
                    chars,
                    total_duration_ms: total,
                    source: TimingSource::Explicit,
                };
            }
        }

        let duration = fields::TOTAL_DURATION.extract(&value).filter(|d| *d > 0.0);
        self.estimate(&text, duration)
    }

    /// Even estimate over `duration` (or the default), punctuation shrunk to a
    /// fixed fraction of the even share. The last end equals the duration.
    pub fn estimate(&self, text: &str, duration: Option<f64>) -> Timeline {
        let (total, source) = match duration {
            Some(d) => (d, TimingSource::Estimated),
            None => (self.default_duration_ms, TimingSource::Default),
        };

        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Timeline {
                chars: Vec::new(),
                total_duration_ms: round_ms(total),
                source,
            };
        }

        let n = chars.len() as f64;
        let share = total / n;
        let punct_count = chars.iter().filter(|c| is_punctuation(**c)).count() as f64;
        let (punct_width, other_width) = if punct_count == n {
            (share, share)
        } else {
            let punct_width = share * PUNCT_SHARE;
            (punct_width, (total - punct_count * punct_width) / (n - punct_count))
        };

        let mut t = 0.0;
        let stamps = chars
            .iter()
            .map(|&c| {
                let width = if is_punctuation(c) { punct_width } else { other_width };
                let ts = stamp(c, t, t + width);
                t += width;
                ts
            })
            .collect();

        Timeline {
            chars: stamps,
            total_duration_ms: round_ms(total),
            source,
        }
    }
}

fn parse_word_spans(words: &[Value]) -> Vec<WordSpan> {
    words
        .iter()
        .filter_map(|w| {
            let word = fields::WORD_TEXT.extract(w)?;
            let start = fields::WORD_START.extract(w).unwrap_or(0.0) * 1000.0;
            let end = fields::WORD_END.extract(w).map(|e| e * 1000.0).unwrap_or(start);
            Some(WordSpan {
                word,
                start_ms: start,
                end_ms: end.max(start),
            })
        })
        .filter(|span| !span.word.trim().is_empty())
        .collect()
}

fn parse_char_spans(entries: &[Value]) -> Vec<CharTimestamp> {
    let mut cursor = 0.0_f64;
    entries
        .iter()
        .filter_map(|entry| {
            let char = fields::CHAR_TEXT.extract(entry)?;
            let start = fields::CHAR_START.extract(entry).unwrap_or(cursor);
            let end = fields::CHAR_END.extract(entry).unwrap_or(start).max(start);
            cursor = end;
            Some(CharTimestamp {
                char,
                start_ms: round_ms(start),
                end_ms: round_ms(end),
            })
        })
        .collect()
}

/// Walk the sentence text alongside the word spans.
///
/// Whitespace and unmatched punctuation between words get fixed widths from
/// the previous end; each word's cleaned characters split its span evenly
/// after its trailing punctuation run is reserved. Characters of the text not
/// covered by any word are chained at the end.
fn from_word_spans(spans: &[WordSpan], text: &str) -> Timeline {
    let joined;
    let text = if text.is_empty() {
        joined = spans.iter().map(|s| s.word.trim()).collect::<String>();
        joined.as_str()
    } else {
        text
    };
    let chars: Vec<char> = text.chars().collect();

    let mut out = Vec::with_capacity(chars.len());
    let mut pos = 0usize;
    let mut cursor = 0.0_f64;

    for span in spans {
        let word: Vec<char> = span.word.trim().chars().collect();
        let Some(&first) = word.first() else { continue };

        while pos < chars.len() {
            let c = chars[pos];
            let width = if c.is_whitespace() {
                GAP_MS
            } else if is_punctuation(c) && c != first {
                PUNCT_MS
            } else {
                break;
            };
            out.push(stamp(c, cursor, cursor + width));
            cursor += width;
            pos += 1;
        }

        let clean_len = word.iter().rposition(|c| !is_punctuation(*c)).map_or(0, |i| i + 1);
        let punct_len = word.len() - clean_len;
        let duration = span.end_ms - span.start_ms;
        let clean_duration = (duration - PUNCT_MS * punct_len as f64).max(0.0);
        let per_char = if clean_len > 0 {
            clean_duration / clean_len as f64
        } else {
            0.0
        };

        let mut t = span.start_ms.max(cursor);
        for _ in 0..clean_len {
            if pos >= chars.len() {
                break;
            }
            out.push(stamp(chars[pos], t, t + per_char));
            t += per_char;
            pos += 1;
        }
        for _ in 0..punct_len {
            if pos >= chars.len() || !is_punctuation(chars[pos]) {
                break;
            }
            out.push(stamp(chars[pos], t, t + PUNCT_MS));
            t += PUNCT_MS;
            pos += 1;
        }

        cursor = t.max(span.end_ms);
    }

    for &c in &chars[pos..] {
        out.push(stamp(c, cursor, cursor + LEFTOVER_MS));
        cursor += LEFTOVER_MS;
    }

    Timeline {
        chars: out,
        total_duration_ms: round_ms(cursor),
        source: TimingSource::WordSpans,
    }
}
