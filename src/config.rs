//! Synthesis backend configuration.
//!
//! Loaded from a TOML file (`TtsConfig::load`) or from `SPEECHSYNC_*`
//! environment variables (`TtsConfig::from_env`). Every field has a default so
//! partial files are accepted; `validate` rejects configurations that cannot
//! reach the backend before any socket is opened.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

/// Default bidirectional streaming endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/tts/bidirection";

/// Environment variable prefix for [`TtsConfig::from_env`].
const ENV_PREFIX: &str = "SPEECHSYNC_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    /// WebSocket endpoint of the synthesis backend.
    pub endpoint: String,
    pub app_id: String,
    pub access_token: String,
    /// Backend resource id; must match the speaker family.
    pub resource_id: String,
    /// Voice / speaker selection.
    pub speaker: String,
    /// Opaque end-user id forwarded in session payloads.
    pub user_id: String,
    /// Audio container/codec: `mp3`, `ogg_opus` or `pcm`.
    pub audio_format: String,
    pub sample_rate: u32,
    /// Speech rate offset, -50..=100.
    pub speech_rate: i32,
    pub disable_markdown_filter: bool,
    /// Bound on waiting for the connection-started acknowledgment.
    pub handshake_timeout_ms: u64,
    /// Bound on waiting for the connection-finished acknowledgment on teardown.
    pub finish_timeout_ms: u64,
    /// Sentence duration assumed when the backend supplies no timing at all.
    pub default_sentence_duration_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: String::new(),
            access_token: String::new(),
            resource_id: "seed-tts-1.0".to_string(),
            speaker: "zh_female_shuangkuaisisi_moon_bigtts".to_string(),
            user_id: "speechsync".to_string(),
            audio_format: "mp3".to_string(),
            sample_rate: 24000,
            speech_rate: 0,
            disable_markdown_filter: true,
            handshake_timeout_ms: 10_000,
            finish_timeout_ms: 10_000,
            default_sentence_duration_ms: 2_000,
        }
    }
}

impl TtsConfig {
    /// Platform config file location (`~/.config/speechsync/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "speechsync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, SpeechError> {
        toml::from_str(raw).map_err(|e| SpeechError::Config(format!("invalid config TOML: {e}")))
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, SpeechError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SpeechError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Build a config from defaults overridden by `SPEECHSYNC_*` variables.
    pub fn from_env() -> Self {
        Self::default().with_process_env()
    }

    /// Apply `SPEECHSYNC_*` overrides from the process environment.
    pub fn with_process_env(self) -> Self {
        self.with_env_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from a key lookup (`ENDPOINT`, `APP_ID`, ...).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, slot: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = v.trim().to_string();
            }
        };
        text("ENDPOINT", &mut self.endpoint);
        text("APP_ID", &mut self.app_id);
        text("ACCESS_TOKEN", &mut self.access_token);
        text("RESOURCE_ID", &mut self.resource_id);
        text("SPEAKER", &mut self.speaker);
        text("USER_ID", &mut self.user_id);
        text("AUDIO_FORMAT", &mut self.audio_format);

        if let Some(v) = lookup("SAMPLE_RATE").and_then(|v| v.trim().parse().ok()) {
            self.sample_rate = v;
        }
        if let Some(v) = lookup("SPEECH_RATE").and_then(|v| v.trim().parse().ok()) {
            self.speech_rate = v;
        }
        if let Some(v) = lookup("DISABLE_MARKDOWN_FILTER").and_then(|v| v.trim().parse().ok()) {
            self.disable_markdown_filter = v;
        }
        if let Some(v) = lookup("HANDSHAKE_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.handshake_timeout_ms = v;
        }
        if let Some(v) = lookup("FINISH_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.finish_timeout_ms = v;
        }
        if let Some(v) = lookup("DEFAULT_SENTENCE_DURATION_MS").and_then(|v| v.trim().parse().ok()) {
            self.default_sentence_duration_ms = v;
        }
        self
    }

    /// Reject configurations that cannot possibly reach the backend.
    pub fn validate(&self) -> Result<(), SpeechError> {
        if self.endpoint.trim().is_empty() {
            return Err(SpeechError::Config("endpoint is not set".into()));
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(SpeechError::Config(format!(
                "endpoint must be a ws:// or wss:// URL, got {}",
                self.endpoint
            )));
        }
        if self.app_id.trim().is_empty() {
            return Err(SpeechError::Config("app_id is not set".into()));
        }
        if self.access_token.trim().is_empty() {
            return Err(SpeechError::Config("access_token is not set".into()));
        }
        if self.speaker.trim().is_empty() {
            return Err(SpeechError::Config("speaker is not set".into()));
        }
        if self.sample_rate == 0 {
            return Err(SpeechError::Config("sample_rate must be positive".into()));
        }
        if self.handshake_timeout_ms == 0 || self.finish_timeout_ms == 0 {
            return Err(SpeechError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn finish_timeout(&self) -> Duration {
        Duration::from_millis(self.finish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> TtsConfig {
        TtsConfig {
            app_id: "app".into(),
            access_token: "token".into(),
            ..TtsConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config = TtsConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.default_sentence_duration_ms, 2000);
        assert!(config.disable_markdown_filter);
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = TtsConfig::default().validate().unwrap_err();
        assert!(matches!(err, SpeechError::Config(msg) if msg.contains("app_id")));

        let config = TtsConfig {
            app_id: "app".into(),
            ..TtsConfig::default()
        };
        assert!(matches!(config.validate(), Err(SpeechError::Config(msg)) if msg.contains("access_token")));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn non_websocket_endpoint_rejected() {
        let config = TtsConfig {
            endpoint: "https://example.com".into(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = TtsConfig {
            handshake_timeout_ms: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TtsConfig::from_toml_str(
            r#"
app_id = "a1"
access_token = "t1"
sample_rate = 16000
"#,
        )
        .unwrap();
        assert_eq!(config.app_id, "a1");
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.audio_format, "mp3");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(matches!(
            TtsConfig::from_toml_str("sample_rate = \"fast\""),
            Err(SpeechError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "speaker = \"custom_voice\"\n").unwrap();
        let config = TtsConfig::load(&path).unwrap();
        assert_eq!(config.speaker, "custom_voice");

        let missing = dir.path().join("nope.toml");
        assert!(matches!(TtsConfig::load(&missing), Err(SpeechError::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APP_ID", "env-app"),
            ("ACCESS_TOKEN", " env-token "),
            ("SAMPLE_RATE", "8000"),
            ("HANDSHAKE_TIMEOUT_MS", "not-a-number"),
            ("SPEAKER", ""),
        ]);
        let config = TtsConfig::default().with_env_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.app_id, "env-app");
        assert_eq!(config.access_token, "env-token");
        assert_eq!(config.sample_rate, 8000);
        assert_eq!(config.handshake_timeout_ms, 10_000);
        assert_eq!(config.speaker, TtsConfig::default().speaker);
    }

    #[test]
    fn env_override_sets_sentence_duration_fallback() {
        let vars: HashMap<&str, &str> = HashMap::from([("DEFAULT_SENTENCE_DURATION_MS", " 3500 ")]);
        let config = TtsConfig::default().with_env_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.default_sentence_duration_ms, 3_500);

        let vars: HashMap<&str, &str> = HashMap::from([("DEFAULT_SENTENCE_DURATION_MS", "-1")]);
        let config = TtsConfig::default().with_env_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.default_sentence_duration_ms, 2_000);
    }
}
