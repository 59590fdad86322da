#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Streaming speech-session engine.
//!
//! Feeds an incremental AI text stream into a bidirectional streaming TTS
//! backend over one WebSocket connection, reassembles the audio it returns per
//! sentence and derives per-character timestamps for text/audio sync.

pub mod config;
pub mod error;
pub mod events;
pub mod processor;
pub mod protocol;
pub mod session;
pub mod speech;

pub use config::TtsConfig;
pub use error::{ProtocolError, SpeechError};
pub use events::{ClientEvent, EventSink};
pub use processor::{ChatSummary, ServerStreamingAudioTextProcessor};
pub use session::SessionState;
pub use speech::{CharTimestamp, Sentence, SentenceId};
