//! Error taxonomy for the speech streaming engine.
//!
//! `ProtocolError` covers frame-level decoding problems and is produced by the
//! codec only. `SpeechError` is what every public async entry point returns.
//! Inbound payload parse failures are recovered locally (timestamp estimation,
//! synthetic sentence ids) and logged. `SpeechError::PayloadParse` is only
//! returned when an outbound control payload cannot be serialized.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Malformed or unsupported wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid header size {0}")]
    InvalidHeaderSize(u8),

    #[error("unknown message type {0:#06b}")]
    UnknownMessageType(u8),

    #[error("unsupported compression {0:#06b}")]
    UnsupportedCompression(u8),

    #[error("unknown event kind {0}")]
    UnknownEvent(i32),

    #[error("frame without event number")]
    MissingEvent,

    #[error("declared payload length {declared} does not match {available} remaining bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("control payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Terminal and recoverable errors of a speech session.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Missing credentials/endpoint; raised before any connection attempt.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection-started acknowledgment not received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Control payload could not be (de)serialized.
    #[error("control payload parse error: {0}")]
    PayloadParse(String),

    /// Socket closed, backend failure or caller abort in the middle of a session.
    #[error("session aborted: {0}")]
    SessionAborted(String),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl SpeechError {
    /// Stable machine-readable code used in client-facing error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::HandshakeTimeout(_) => "HANDSHAKE_TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::PayloadParse(_) => "PAYLOAD_PARSE_ERROR",
            Self::SessionAborted(_) => "SESSION_ABORTED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

impl From<serde_json::Error> for SpeechError {
    fn from(e: serde_json::Error) -> Self {
        Self::PayloadParse(e.to_string())
    }
}
