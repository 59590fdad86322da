//! Outbound control payloads sent to the synthesis backend.

use serde::Serialize;

use super::frame::{EventKind, Frame};
use crate::config::TtsConfig;

/// Namespace the backend expects on connection and session frames.
pub const NAMESPACE: &str = "BidirectionalTTS";

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub speech_rate: i32,
    /// Ask the backend for word-level timing on sentence-end frames.
    pub enable_timestamp: bool,
}

/// Options the backend only accepts as an embedded JSON string.
#[derive(Debug, Serialize)]
pub struct Additions {
    pub disable_markdown_filter: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionReqParams {
    pub speaker: String,
    pub audio_params: AudioParams,
    pub additions: String,
}

/// Payload of the session-start frame.
#[derive(Debug, Serialize)]
pub struct StartSessionPayload {
    pub user: UserInfo,
    pub event: i32,
    pub namespace: &'static str,
    pub req_params: SessionReqParams,
}

#[derive(Debug, Serialize)]
pub struct TaskReqParams {
    pub text: String,
}

/// Payload of one task-submission frame (one text increment).
#[derive(Debug, Serialize)]
pub struct TaskPayload {
    pub user: UserInfo,
    pub event: i32,
    pub namespace: &'static str,
    pub req_params: TaskReqParams,
}

/// Build the connection-start frame.
pub fn start_connection() -> Frame {
    Frame::control(EventKind::StartConnection, None, "{}")
}

/// Build the connection-finish frame.
pub fn finish_connection() -> Frame {
    Frame::control(EventKind::FinishConnection, None, "{}")
}

/// Build the session-start frame for `session_id`.
pub fn start_session(config: &TtsConfig, session_id: &str) -> Result<Frame, serde_json::Error> {
    let additions = serde_json::to_string(&Additions {
        disable_markdown_filter: config.disable_markdown_filter,
    })?;
    let payload = StartSessionPayload {
        user: UserInfo {
            uid: config.user_id.clone(),
        },
        event: event_code(EventKind::StartSession),
        namespace: NAMESPACE,
        req_params: SessionReqParams {
            speaker: config.speaker.clone(),
            audio_params: AudioParams {
                format: config.audio_format.clone(),
                sample_rate: config.sample_rate,
                speech_rate: config.speech_rate,
                enable_timestamp: true,
            },
            additions,
        },
    };
    Ok(Frame::control(
        EventKind::StartSession,
        Some(session_id.to_string()),
        serde_json::to_string(&payload)?,
    ))
}

/// Build one task-submission frame carrying a text increment.
pub fn task_request(config: &TtsConfig, session_id: &str, text: &str) -> Result<Frame, serde_json::Error> {
    let payload = TaskPayload {
        user: UserInfo {
            uid: config.user_id.clone(),
        },
        event: event_code(EventKind::TaskRequest),
        namespace: NAMESPACE,
        req_params: TaskReqParams {
            text: text.to_string(),
        },
    };
    Ok(Frame::control(
        EventKind::TaskRequest,
        Some(session_id.to_string()),
        serde_json::to_string(&payload)?,
    ))
}

/// Build the session-finish frame.
pub fn finish_session(session_id: &str) -> Frame {
    Frame::control(EventKind::FinishSession, Some(session_id.to_string()), "{}")
}

/// Build the session-cancel frame sent on abort.
pub fn cancel_session(session_id: &str) -> Frame {
    Frame::control(EventKind::CancelSession, Some(session_id.to_string()), "{}")
}

fn event_code(kind: EventKind) -> i32 {
    kind.code().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{decode, encode};

    #[test]
    fn start_session_payload_shape() {
        let config = TtsConfig {
            speaker: "zh_female_demo".into(),
            sample_rate: 16000,
            ..TtsConfig::default()
        };
        let frame = start_session(&config, "sess-1").unwrap();
        assert_eq!(frame.id.as_deref(), Some("sess-1"));

        let value: serde_json::Value = serde_json::from_str(frame.control_text()).unwrap();
        assert_eq!(value["event"], 100);
        assert_eq!(value["namespace"], "BidirectionalTTS");
        assert_eq!(value["req_params"]["speaker"], "zh_female_demo");
        assert_eq!(value["req_params"]["audio_params"]["sample_rate"], 16000);
        assert_eq!(value["req_params"]["audio_params"]["format"], "mp3");

        let additions: serde_json::Value =
            serde_json::from_str(value["req_params"]["additions"].as_str().unwrap()).unwrap();
        assert_eq!(additions["disable_markdown_filter"], true);
    }

    #[test]
    fn task_request_carries_text_and_session() {
        let config = TtsConfig::default();
        let frame = task_request(&config, "sess-9", "你好").unwrap();
        let decoded = decode(&encode(&frame)).unwrap();
        assert_eq!(decoded.event, EventKind::TaskRequest);
        assert_eq!(decoded.id.as_deref(), Some("sess-9"));
        let value: serde_json::Value = serde_json::from_str(decoded.control_text()).unwrap();
        assert_eq!(value["req_params"]["text"], "你好");
    }

    #[test]
    fn finish_frames() {
        assert_eq!(finish_connection().event, EventKind::FinishConnection);
        assert!(finish_connection().id.is_none());
        assert_eq!(finish_session("s").id.as_deref(), Some("s"));
        assert_eq!(start_connection().event, EventKind::StartConnection);
    }
}
