//! Voice support: transcribing inbound voice notes and synthesizing
//! spoken replies.
//!
//! Both directions go through traits (`SpeechToText`, `TextToSpeech`) with
//! OpenAI-backed implementations. Audio lives in short-lived files owned
//! through `TransientAudio`.

pub mod artifact;
pub mod config;
pub mod stt;
pub mod tts;

pub use artifact::TransientAudio;
pub use config::VoiceConfig;
pub use stt::{OpenAiStt, SpeechToText};
pub use tts::{OpenAiTts, TextToSpeech};
