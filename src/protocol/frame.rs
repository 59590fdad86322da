//! Binary frame codec for the bidirectional synthesis connection.
//!
//! ## Wire layout (big endian)
//!
//! ```text
//! [0] version:4 | header_size:4     header size counted in 4-byte words
//! [1] message_type:4 | flags:4
//! [2] serialization:4 | compression:4
//! [3] reserved
//! [ext]   (header_size - 1) * 4 bytes, skipped
//! [i32]   sequence               if flags & FLAG_SEQUENCE
//! [u32]   error code             if message_type == error
//! [i32]   event                  if flags & FLAG_EVENT
//! [u32 + bytes] id               connection id (events 50..=52) or session id (events >= 100)
//! [u32 + bytes] payload          length must match the remaining bytes exactly
//! ```
//!
//! The codec is stateless: `encode` and `decode` are free functions over
//! borrowed data and can be called from any number of sessions at once.

use crate::error::ProtocolError;

// ── Header constants ───────────────────────────────────────────────

const PROTOCOL_VERSION: u8 = 0b0001;
const HEADER_WORDS: u8 = 0b0001;
const HEADER_LEN: usize = 4;

const MSG_FULL_CLIENT: u8 = 0b0001;
const MSG_AUDIO_ONLY_CLIENT: u8 = 0b0010;
const MSG_FULL_SERVER: u8 = 0b1001;
const MSG_AUDIO_ONLY_SERVER: u8 = 0b1011;
const MSG_ERROR: u8 = 0b1111;

const FLAG_SEQUENCE: u8 = 0b0001;
const FLAG_EVENT: u8 = 0b0100;

const SERIALIZATION_RAW: u8 = 0b0000;
const SERIALIZATION_JSON: u8 = 0b0001;
const COMPRESSION_NONE: u8 = 0b0000;

// ── Event kinds ────────────────────────────────────────────────────

/// Event carried by a frame. Payload interpretation depends on this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StartConnection,
    FinishConnection,
    ConnectionStarted,
    ConnectionFailed,
    ConnectionFinished,
    StartSession,
    CancelSession,
    FinishSession,
    SessionStarted,
    SessionCanceled,
    SessionFinished,
    SessionFailed,
    TaskRequest,
    SentenceStart,
    SentenceEnd,
    AudioResponse,
    /// Error frame (message type `0b1111`); has no wire event number.
    ServerError,
}

impl EventKind {
    /// Wire event number, `None` for error frames.
    pub fn code(self) -> Option<i32> {
        let code = match self {
            Self::StartConnection => 1,
            Self::FinishConnection => 2,
            Self::ConnectionStarted => 50,
            Self::ConnectionFailed => 51,
            Self::ConnectionFinished => 52,
            Self::StartSession => 100,
            Self::CancelSession => 101,
            Self::FinishSession => 102,
            Self::SessionStarted => 150,
            Self::SessionCanceled => 151,
            Self::SessionFinished => 152,
            Self::SessionFailed => 153,
            Self::TaskRequest => 200,
            Self::SentenceStart => 350,
            Self::SentenceEnd => 351,
            Self::AudioResponse => 352,
            Self::ServerError => return None,
        };
        Some(code)
    }

    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        Ok(match code {
            1 => Self::StartConnection,
            2 => Self::FinishConnection,
            50 => Self::ConnectionStarted,
            51 => Self::ConnectionFailed,
            52 => Self::ConnectionFinished,
            100 => Self::StartSession,
            101 => Self::CancelSession,
            102 => Self::FinishSession,
            150 => Self::SessionStarted,
            151 => Self::SessionCanceled,
            152 => Self::SessionFinished,
            153 => Self::SessionFailed,
            200 => Self::TaskRequest,
            350 => Self::SentenceStart,
            351 => Self::SentenceEnd,
            352 => Self::AudioResponse,
            other => return Err(ProtocolError::UnknownEvent(other)),
        })
    }

    /// Whether the payload is raw audio rather than control text.
    pub fn carries_audio(self) -> bool {
        matches!(self, Self::AudioResponse)
    }

    /// Whether an id field (connection or session id) follows the event number.
    pub fn carries_id(self) -> bool {
        match self.code() {
            Some(code) => (50..=52).contains(&code) || code >= 100,
            None => false,
        }
    }

    /// Whether the client (rather than the backend) sends this event.
    pub fn is_client_event(self) -> bool {
        matches!(
            self,
            Self::StartConnection
                | Self::FinishConnection
                | Self::StartSession
                | Self::CancelSession
                | Self::FinishSession
                | Self::TaskRequest
        )
    }

    fn message_type(self) -> u8 {
        if self == Self::ServerError {
            MSG_ERROR
        } else if self.carries_audio() {
            MSG_AUDIO_ONLY_SERVER
        } else if self.is_client_event() {
            MSG_FULL_CLIENT
        } else {
            MSG_FULL_SERVER
        }
    }
}

// ── Frame ──────────────────────────────────────────────────────────

/// Frame payload. The variant is chosen by [`EventKind::carries_audio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Structured control payload (JSON text).
    Control(String),
    /// Raw audio bytes in the negotiated format.
    Audio(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Control(text) => text.as_bytes(),
            Self::Audio(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One discrete message exchanged over the synthesis connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: EventKind,
    pub sequence: Option<i32>,
    /// Connection id or session id, depending on the event. Empty ids are
    /// encoded as zero length and decode back to `None`.
    pub id: Option<String>,
    /// Only set for [`EventKind::ServerError`] frames.
    pub error_code: Option<u32>,
    pub payload: Payload,
}

impl Frame {
    /// Control frame with a JSON payload.
    pub fn control(event: EventKind, id: Option<String>, payload: impl Into<String>) -> Self {
        Self {
            event,
            sequence: None,
            id,
            error_code: None,
            payload: Payload::Control(payload.into()),
        }
    }

    /// Audio frame as the backend emits it.
    pub fn audio(session_id: Option<String>, data: Vec<u8>) -> Self {
        Self {
            event: EventKind::AudioResponse,
            sequence: None,
            id: session_id,
            error_code: None,
            payload: Payload::Audio(data),
        }
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Control text of the frame, empty for audio frames.
    pub fn control_text(&self) -> &str {
        match &self.payload {
            Payload::Control(text) => text,
            Payload::Audio(_) => "",
        }
    }
}

// ── Encoding ───────────────────────────────────────────────────────

/// Serialize a frame into one binary WebSocket message.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let payload = frame.payload.as_bytes();
    let id = frame.id.as_deref().unwrap_or("");
    let mut out = Vec::with_capacity(HEADER_LEN + 16 + id.len() + payload.len());

    let message_type = frame.event.message_type();
    let mut flags = 0u8;
    if frame.sequence.is_some() {
        flags |= FLAG_SEQUENCE;
    }
    if frame.event.code().is_some() {
        flags |= FLAG_EVENT;
    }
    let serialization = if frame.event.carries_audio() {
        SERIALIZATION_RAW
    } else {
        SERIALIZATION_JSON
    };

    out.push((PROTOCOL_VERSION << 4) | HEADER_WORDS);
    out.push((message_type << 4) | flags);
    out.push((serialization << 4) | COMPRESSION_NONE);
    out.push(0);

    if let Some(sequence) = frame.sequence {
        out.extend_from_slice(&sequence.to_be_bytes());
    }
    if message_type == MSG_ERROR {
        out.extend_from_slice(&frame.error_code.unwrap_or(0).to_be_bytes());
    }
    if let Some(code) = frame.event.code() {
        out.extend_from_slice(&code.to_be_bytes());
    }
    if frame.event.carries_id() {
        out.extend_from_slice(&(id.len() as u32).to_be_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// ── Decoding ───────────────────────────────────────────────────────

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.data.len() - self.offset;
        if n > available {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed: n,
                available,
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 4], ProtocolError> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.word().map(u32::from_be_bytes)
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.word().map(i32::from_be_bytes)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// Parse one binary WebSocket message into a frame.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let mut cursor = Cursor { data, offset: 0 };
    let header = cursor.take(HEADER_LEN)?;

    let version = header[0] >> 4;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let header_words = header[0] & 0x0f;
    if header_words == 0 {
        return Err(ProtocolError::InvalidHeaderSize(header_words));
    }
    let message_type = header[1] >> 4;
    let flags = header[1] & 0x0f;
    let compression = header[2] & 0x0f;

    if !matches!(
        message_type,
        MSG_FULL_CLIENT | MSG_AUDIO_ONLY_CLIENT | MSG_FULL_SERVER | MSG_AUDIO_ONLY_SERVER | MSG_ERROR
    ) {
        return Err(ProtocolError::UnknownMessageType(message_type));
    }
    if compression != COMPRESSION_NONE {
        return Err(ProtocolError::UnsupportedCompression(compression));
    }
    cursor.take((header_words as usize - 1) * 4)?;

    let sequence = if flags & FLAG_SEQUENCE != 0 {
        Some(cursor.i32()?)
    } else {
        None
    };

    let error_code = if message_type == MSG_ERROR {
        Some(cursor.u32()?)
    } else {
        None
    };

    let event = if flags & FLAG_EVENT != 0 {
        EventKind::from_code(cursor.i32()?)?
    } else if message_type == MSG_ERROR {
        EventKind::ServerError
    } else {
        return Err(ProtocolError::MissingEvent);
    };

    let id = if event.carries_id() {
        let len = cursor.u32()? as usize;
        let raw = cursor.take(len)?;
        let id = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        (!id.is_empty()).then(|| id.to_string())
    } else {
        None
    };

    let declared = cursor.u32()? as usize;
    let available = cursor.remaining();
    if declared != available {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available,
        });
    }
    let raw = cursor.take(declared)?;

    let payload = if event.carries_audio() {
        Payload::Audio(raw.to_vec())
    } else {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        Payload::Control(text.to_string())
    };

    Ok(Frame {
        event,
        sequence,
        id,
        error_code,
        payload,
    })
}

// ── Tests ──────────────────────────────────────────────────────────
