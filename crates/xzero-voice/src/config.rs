//! Voice service configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_STT_MODEL: &str = "whisper-1";
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "alloy";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Models and endpoint used for speech in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Language hint passed to transcription (ISO-639-1), auto-detect when unset.
    #[serde(default)]
    pub language: Option<String>,
}

fn default_stt_model() -> String {
    DEFAULT_STT_MODEL.into()
}
fn default_tts_model() -> String {
    DEFAULT_TTS_MODEL.into()
}
fn default_tts_voice() -> String {
    DEFAULT_TTS_VOICE.into()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            stt_model: DEFAULT_STT_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            tts_voice: DEFAULT_TTS_VOICE.into(),
            base_url: DEFAULT_BASE_URL.into(),
            language: None,
        }
    }
}

impl VoiceConfig {
    /// Defaults with an explicit key (the OpenAI key from the LLM config).
    pub fn with_api_key(api_key: Option<String>) -> Self {
        Self {
            api_key,
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
