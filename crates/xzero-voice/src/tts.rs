//! Text-to-speech.
//!
//! Uses the OpenAI Audio API and writes the mp3 it returns to disk.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;
use xzero_core::{Error, Result};

use crate::config::VoiceConfig;

/// Synthesizes speech into an audio file.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Write a playable rendition of `text` to `output_path`.
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()>;

    /// File extension of the produced audio.
    fn extension(&self) -> &str;

    /// Get the provider name.
    fn provider_name(&self) -> &str;
}

/// OpenAI TTS API implementation.
pub struct OpenAiTts {
    api_key: String,
    client: Client,
    model: String,
    voice: String,
    base_url: String,
}

impl OpenAiTts {
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("text-to-speech requires an OpenAI API key".into()))?;

        Ok(Self {
            api_key,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::Speech("nothing to synthesize".into()));
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "mp3",
        });

        let url = format!("{}/v1/audio/speech", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Speech(format!(
                "OpenAI TTS API error ({}): {}",
                status, error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::Speech("TTS returned no audio".into()));
        }

        tokio::fs::write(output_path, &bytes).await?;
        info!(
            "OpenAI TTS synthesized {} chars → {} bytes at {}",
            text.len(),
            bytes.len(),
            output_path.display()
        );

        Ok(())
    }

    fn extension(&self) -> &str {
        "mp3"
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
