//! External LLM provider calls.
//!
//! Each provider streams tokens via SSE from its API; the bot only needs
//! the finished reply, so `collect_completion` drains the stream.
//! OpenAI and Groq share one wire format. Anthropic uses a different one.

use std::pin::Pin;

use futures::Stream;
use reqwest::Client;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::types::{ChatMessage, ChatRole, CompletionParams, LLMProvider};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token or error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(String),
}

/// Stream tokens from the appropriate provider.
pub fn stream_llm(
    client: &Client,
    provider: LLMProvider,
    messages: Vec<ChatMessage>,
    params: &CompletionParams,
    api_key: &str,
) -> BoxedStream {
    match provider {
        LLMProvider::OpenAI => Box::pin(stream_openai_compat(
            client.clone(),
            OPENAI_CHAT_URL,
            messages,
            params.clone(),
            api_key.to_string(),
        )),
        LLMProvider::Groq => Box::pin(stream_openai_compat(
            client.clone(),
            GROQ_CHAT_URL,
            messages,
            params.clone(),
            api_key.to_string(),
        )),
        LLMProvider::Anthropic => Box::pin(stream_anthropic(
            client.clone(),
            messages,
            params.clone(),
            api_key.to_string(),
        )),
    }
}

/// Drain a token stream into the full reply text.
///
/// The first `StreamChunk::Error` aborts collection.
pub async fn collect_completion<S>(stream: S) -> Result<String, String>
where
    S: Stream<Item = StreamChunk>,
{
    tokio::pin!(stream);

    let mut full_response = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            StreamChunk::Token(text) => full_response.push_str(&text),
            StreamChunk::Done { tokens_used } => {
                debug!("Completion finished: {} tokens", tokens_used);
                break;
            }
            StreamChunk::Error(e) => return Err(e),
        }
    }

    Ok(full_response)
}

/// Raw SSE bytes, handed out one complete line at a time.
///
/// Lines are decoded only once whole, so a multi-byte character split
/// across network chunks survives.
#[derive(Debug, Default)]
struct SseLines {
    buf: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, trimmed. `None` until a newline arrives.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Pull the token out of one OpenAI-style SSE `data:` payload.
fn openai_delta(data: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(data).ok()?;
    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Stream from OpenAI-compatible APIs (OpenAI, Groq).
fn stream_openai_compat(
    client: Client,
    url: &str,
    messages: Vec<ChatMessage>,
    params: CompletionParams,
    api_key: String,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let url = url.to_string();
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    async_stream::stream! {
        let body = json!({
            "model": params.model,
            "messages": msgs,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, params.model);

        let response = match client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            lines.push(&bytes);

            // Process complete SSE lines
            while let Some(line) = lines.next_line() {

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }

                if let Some(data) = line.strip_prefix("data: ") {
                    if data.trim() == "[DONE]" {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }

                    if let Some(content) = openai_delta(data) {
                        token_count += 1;
                        yield StreamChunk::Token(content);
                    }
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

/// Stream from Anthropic's Messages API.
fn stream_anthropic(
    client: Client,
    messages: Vec<ChatMessage>,
    params: CompletionParams,
    api_key: String,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    // Separate system message from conversation
    let system_msg: Option<String> = messages
        .iter()
        .find(|m| m.role == ChatRole::System)
        .map(|m| m.content.clone());

    let conv_msgs: Vec<serde_json::Value> = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    async_stream::stream! {
        let mut body = json!({
            "model": params.model,
            "messages": conv_msgs,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": true,
        });

        if let Some(sys) = system_msg {
            body["system"] = json!(sys);
        }

        debug!("Streaming from Anthropic with model {}", params.model);

        let response = match client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            lines.push(&bytes);

            while let Some(line) = lines.next_line() {

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }

                // Anthropic uses "event: " lines followed by "data: " lines
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                        match parsed["type"].as_str() {
                            Some("content_block_delta") => {
                                if let Some(text) = parsed["delta"]["text"].as_str() {
                                    if !text.is_empty() {
                                        token_count += 1;
                                        yield StreamChunk::Token(text.to_string());
                                    }
                                }
                            }
                            Some("message_stop") => {
                                yield StreamChunk::Done { tokens_used: token_count };
                                return;
                            }
                            Some("error") => {
                                let msg = parsed["error"]["message"]
                                    .as_str()
                                    .unwrap_or("Unknown error");
                                error!("Anthropic error: {}", msg);
                                yield StreamChunk::Error(msg.to_string());
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

/// Test an API key by making a minimal request.
pub async fn test_api_key(provider: LLMProvider, api_key: &str) -> Result<(), String> {
    let client = Client::new();

    let resp = match provider {
        LLMProvider::OpenAI => client
            .get("https://api.openai.com/v1/models")
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
            .map_err(|e| e.to_string())?,
        LLMProvider::Groq => client
            .get("https://api.groq.com/openai/v1/models")
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
            .map_err(|e| e.to_string())?,
        LLMProvider::Anthropic => {
            let resp = client
                .post(ANTHROPIC_MESSAGES_URL)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .header("Content-Type", "application/json")
                .json(&json!({
                    "model": "claude-3-5-haiku-20241022",
                    "max_tokens": 1,
                    "messages": [{"role": "user", "content": "Hi"}],
                }))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            // 400 with valid key means key works (may be quota/model issue)
            if resp.status().as_u16() == 400 {
                return Ok(());
            }
            resp
        }
    };

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("API returned status {}", resp.status()))
    }
}
