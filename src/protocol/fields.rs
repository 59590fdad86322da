//! Tolerant field extraction for backend control payloads.
//!
//! The backend is inconsistent about field names (`startTime` vs `start_time`,
//! `sentence` vs `text`, ids as numbers or strings). Each logical field is an
//! ordered list of named rules; the first rule that yields a value wins.
//! New naming variants are added to the rule tables only.

use serde_json::Value;

/// One named way of pulling a value out of a JSON payload.
pub struct FieldRule<T> {
    pub name: &'static str,
    pub extract: fn(&Value) -> Option<T>,
}

/// Ordered rule set for one logical field.
pub struct FieldRules<T: 'static> {
    rules: &'static [FieldRule<T>],
}

impl<T> FieldRules<T> {
    pub const fn new(rules: &'static [FieldRule<T>]) -> Self {
        Self { rules }
    }

    /// First matching value.
    pub fn extract(&self, value: &Value) -> Option<T> {
        self.extract_named(value).map(|(_, v)| v)
    }

    /// First matching value together with the name of the rule that produced it.
    pub fn extract_named(&self, value: &Value) -> Option<(&'static str, T)> {
        self.rules
            .iter()
            .find_map(|rule| (rule.extract)(value).map(|v| (rule.name, v)))
    }
}

// ── Primitive helpers ──────────────────────────────────────────────

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number_at(value: &Value, pointer: &str) -> Option<f64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn id_at(value: &Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Rule tables ────────────────────────────────────────────────────

pub static SENTENCE_ID: FieldRules<i64> = FieldRules::new(&[
    FieldRule { name: "sentence_id", extract: |v| id_at(v, "/sentence_id") },
    FieldRule { name: "sentenceId", extract: |v| id_at(v, "/sentenceId") },
    FieldRule { name: "res_params.sentence_id", extract: |v| id_at(v, "/res_params/sentence_id") },
]);

pub static SENTENCE_TEXT: FieldRules<String> = FieldRules::new(&[
    FieldRule { name: "sentence", extract: |v| str_at(v, "/sentence") },
    FieldRule { name: "text", extract: |v| str_at(v, "/text") },
    FieldRule { name: "content", extract: |v| str_at(v, "/content") },
    FieldRule { name: "res_params.text", extract: |v| str_at(v, "/res_params/text") },
]);

/// Words array of a sentence-end payload.
pub static WORDS: FieldRules<Vec<Value>> = FieldRules::new(&[
    FieldRule {
        name: "words",
        extract: |v| v.get("words").and_then(Value::as_array).filter(|a| !a.is_empty()).cloned(),
    },
    FieldRule {
        name: "res_params.words",
        extract: |v| {
            v.pointer("/res_params/words")
                .and_then(Value::as_array)
                .filter(|a| !a.is_empty())
                .cloned()
        },
    },
]);

/// Explicit per-character timestamps of a sentence-end payload.
pub static CHAR_TIMESTAMPS: FieldRules<Vec<Value>> = FieldRules::new(&[
    FieldRule {
        name: "timestamps",
        extract: |v| v.get("timestamps").and_then(Value::as_array).filter(|a| !a.is_empty()).cloned(),
    },
    FieldRule {
        name: "char_timestamps",
        extract: |v| {
            v.get("char_timestamps")
                .and_then(Value::as_array)
                .filter(|a| !a.is_empty())
                .cloned()
        },
    },
]);

pub static WORD_TEXT: FieldRules<String> = FieldRules::new(&[
    FieldRule { name: "word", extract: |v| v.get("word").and_then(Value::as_str).map(str::to_string) },
    FieldRule { name: "text", extract: |v| v.get("text").and_then(Value::as_str).map(str::to_string) },
]);

/// Word span start in seconds.
pub static WORD_START: FieldRules<f64> = FieldRules::new(&[
    FieldRule { name: "startTime", extract: |v| number_at(v, "/startTime") },
    FieldRule { name: "start_time", extract: |v| number_at(v, "/start_time") },
]);

/// Word span end in seconds.
pub static WORD_END: FieldRules<f64> = FieldRules::new(&[
    FieldRule { name: "endTime", extract: |v| number_at(v, "/endTime") },
    FieldRule { name: "end_time", extract: |v| number_at(v, "/end_time") },
]);

pub static CHAR_TEXT: FieldRules<String> = FieldRules::new(&[
    FieldRule { name: "char", extract: |v| v.get("char").and_then(Value::as_str).map(str::to_string) },
    FieldRule {
        name: "character",
        extract: |v| v.get("character").and_then(Value::as_str).map(str::to_string),
    },
]);

/// Character start in milliseconds.
pub static CHAR_START: FieldRules<f64> = FieldRules::new(&[
    FieldRule { name: "start_time", extract: |v| number_at(v, "/start_time") },
    FieldRule { name: "startTime", extract: |v| number_at(v, "/startTime") },
]);

/// Character end in milliseconds.
pub static CHAR_END: FieldRules<f64> = FieldRules::new(&[
    FieldRule { name: "end_time", extract: |v| number_at(v, "/end_time") },
    FieldRule { name: "endTime", extract: |v| number_at(v, "/endTime") },
]);

/// Total sentence duration in milliseconds.
pub static TOTAL_DURATION: FieldRules<f64> = FieldRules::new(&[
    FieldRule { name: "total_duration", extract: |v| number_at(v, "/total_duration") },
    FieldRule { name: "duration", extract: |v| number_at(v, "/duration") },
    FieldRule { name: "totalDuration", extract: |v| number_at(v, "/totalDuration") },
]);
