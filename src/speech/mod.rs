//! Audio/text synchronization: sentence tracking, audio assembly and
//! per-character timestamps.

pub mod assembler;
pub mod sentence;
pub mod timestamps;
pub mod tracker;

pub use assembler::{assemble, AssembledAudio};
pub use sentence::{AudioChunk, Sentence, SentenceBuilder, SentenceId, SentenceStatus};
pub use timestamps::{CharTimestamp, Timeline, TimestampSynthesizer, TimingSource};
pub use tracker::{AcceptedFragment, SentenceStore, SentenceTracker, StartedSentence};
