//! Completion service seam.
//!
//! `CompletionService` is the only way the dispatch logic reaches an LLM.
//! `LlmCompletionClient` is the HTTP implementation; tests substitute
//! their own.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use xzero_core::{Error, Result};

use crate::config::LLMConfig;
use crate::providers;
use crate::types::{ChatMessage, CompletionParams, LLMProvider};

/// Generates an assistant reply from a prompt.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion. An empty reply counts as a failure.
    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams)
        -> Result<String>;
}

/// Completion client for the configured external provider.
pub struct LlmCompletionClient {
    client: Client,
    provider: LLMProvider,
    api_key: String,
}

impl LlmCompletionClient {
    pub fn new(provider: LLMProvider, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            provider,
            api_key: api_key.into(),
        }
    }

    /// Build a client and its sampling parameters from config.
    /// Returns a configuration error when no provider has a key.
    pub fn from_config(config: &LLMConfig) -> Result<(Self, CompletionParams)> {
        let (provider, model, api_key) = config.resolve_provider().ok_or_else(|| {
            Error::Config(
                "No LLM provider configured (set OPENAI_API_KEY or edit llm-config.json)".into(),
            )
        })?;
        let params = config.params_for(&model);
        Ok((Self::new(provider, api_key), params))
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }
}

#[async_trait]
impl CompletionService for LlmCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String> {
        debug!(
            "Completion request: provider={}, model={}, messages={}",
            self.provider,
            params.model,
            messages.len()
        );

        let stream = providers::stream_llm(
            &self.client,
            self.provider,
            messages.to_vec(),
            params,
            &self.api_key,
        );

        let reply = providers::collect_completion(stream)
            .await
            .map_err(Error::Completion)?;

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(Error::Completion("provider returned an empty reply".into()));
        }
        Ok(reply)
    }
}
