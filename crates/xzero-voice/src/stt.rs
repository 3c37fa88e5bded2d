//! Speech-to-text.
//!
//! `OpenAiStt` uploads the audio file to the OpenAI transcription endpoint
//! (Whisper) as multipart form data.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::info;
use xzero_core::{Error, Result};

use crate::config::VoiceConfig;

/// Transcribes an audio file to text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe the audio at `audio_path`. Empty transcripts are errors.
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;

    /// Get the provider name.
    fn provider_name(&self) -> &str;
}

/// OpenAI Whisper transcription client.
pub struct OpenAiStt {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
    language: Option<String>,
}

impl OpenAiStt {
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("speech-to-text requires an OpenAI API key".into()))?;

        Ok(Self {
            api_key,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            model: config.stt_model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }

    /// MIME type guessed from the file extension.
    fn mime_for(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp3") => "audio/mpeg",
            Some("wav") => "audio/wav",
            Some("m4a") => "audio/mp4",
            Some("webm") => "audio/webm",
            _ => "audio/ogg",
        }
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("voice.ogg")
            .to_string();

        let file_bytes = tokio::fs::read(audio_path).await?;
        if file_bytes.is_empty() {
            return Err(Error::Speech(format!("{} is empty", audio_path.display())));
        }
        let size = file_bytes.len();

        let part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(Self::mime_for(audio_path))
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);
        if let Some(lang) = &self.language {
            form = form.text("language", lang.clone());
        }

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Speech(format!(
                "OpenAI STT API error ({}): {}",
                status, error_text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let text = body["text"].as_str().unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(Error::Speech("transcription returned no text".into()));
        }

        info!("OpenAI STT transcribed {} bytes → {} chars", size, text.len());
        Ok(text)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
