//! Synthesis backend session: lifecycle state machine, connection handshake
//! and the receive demultiplexer.

pub mod connection;
pub mod demux;
pub mod state;

pub use connection::{SessionWriter, SharedState, SpeechSession, SynthesisConnection};
pub use demux::{BackendEvent, InboundItem};
pub use state::{SessionState, StateMachine};
