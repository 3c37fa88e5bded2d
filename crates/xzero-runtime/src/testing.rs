//! Stand-in collaborators for dispatcher and loop tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use xzero_browser::InboundMessage;
use xzero_chat::{ChatMessage, CompletionParams, CompletionService};
use xzero_core::{Error, Result};
use xzero_voice::{SpeechToText, TextToSpeech};

use crate::channel::{MessageSource, ReplySink};
use crate::dispatch::{Reply, ReplyDispatcher};

/// Replies with the next scripted answer, else `echo: <last user message>`.
/// Fails when `fail` is set.
#[derive(Default)]
pub struct StubCompletion {
    pub fail: bool,
    pub script: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubCompletion {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn scripted(replies: &[&str]) -> Self {
        Self {
            script: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<String> {
        self.prompts.lock().push(messages.to_vec());
        if self.fail {
            return Err(Error::Completion("stub provider unavailable".into()));
        }
        if let Some(reply) = self.script.lock().pop_front() {
            return Ok(reply);
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(format!("echo: {}", last))
    }
}

/// Returns a fixed transcript; `None` makes transcription fail.
pub struct StubStt {
    pub transcript: Option<String>,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl StubStt {
    pub fn hearing(transcript: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn deaf() -> Self {
        Self {
            transcript: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechToText for StubStt {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        self.calls.lock().push(audio_path.to_path_buf());
        self.transcript
            .clone()
            .ok_or_else(|| Error::Speech("could not recognize speech".into()))
    }

    fn provider_name(&self) -> &str {
        "stub"
    }
}

/// Writes a tiny mp3 stand-in, or fails when `fail` is set.
#[derive(Default)]
pub struct StubTts {
    pub fail: bool,
    pub texts: Mutex<Vec<String>>,
}

impl StubTts {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TextToSpeech for StubTts {
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
        self.texts.lock().push(text.to_string());
        if self.fail {
            return Err(Error::Speech("stub synthesizer offline".into()));
        }
        std::fs::write(output_path, b"ID3stub")?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "mp3"
    }

    fn provider_name(&self) -> &str {
        "stub"
    }
}

pub struct Collaborators {
    pub completion: Arc<StubCompletion>,
    pub stt: Arc<StubStt>,
    pub tts: Arc<StubTts>,
}

impl Collaborators {
    pub fn new(completion: StubCompletion, stt: StubStt, tts: StubTts) -> Self {
        Self {
            completion: Arc::new(completion),
            stt: Arc::new(stt),
            tts: Arc::new(tts),
        }
    }

    pub fn working() -> Self {
        Self::new(
            StubCompletion::default(),
            StubStt::hearing("what time is it"),
            StubTts::default(),
        )
    }

    pub fn dispatcher(&self, audio_dir: &Path) -> ReplyDispatcher {
        ReplyDispatcher::new(
            self.completion.clone(),
            self.stt.clone(),
            self.tts.clone(),
            CompletionParams {
                model: "stub-model".into(),
                temperature: 0.7,
                max_tokens: 1000,
            },
            audio_dir,
        )
    }
}

/// What a `FakeChannel` was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Text(String),
    /// Voice file path, and whether it existed at delivery time.
    Voice(PathBuf, bool),
}

/// Scripted source and recording sink. Once the script runs out it fires
/// `drained` and then waits forever, like an idle chat list.
pub struct FakeChannel {
    pub inbox: VecDeque<Result<InboundMessage>>,
    pub delivered: Vec<(String, Delivered)>,
    pub fail_delivery_to: Option<String>,
    pub closed: bool,
    drained: Option<oneshot::Sender<()>>,
}

impl FakeChannel {
    pub fn new(inbox: Vec<Result<InboundMessage>>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            inbox: inbox.into(),
            delivered: Vec::new(),
            fail_delivery_to: None,
            closed: false,
            drained: Some(tx),
        };
        (channel, rx)
    }
}

#[async_trait]
impl MessageSource for FakeChannel {
    async fn next_message(&mut self) -> Result<InboundMessage> {
        if let Some(next) = self.inbox.pop_front() {
            return next;
        }
        if let Some(tx) = self.drained.take() {
            let _ = tx.send(());
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl ReplySink for FakeChannel {
    async fn deliver(&mut self, conversation_id: &str, reply: &Reply) -> Result<()> {
        let delivered = match reply {
            Reply::Text(text) => Delivered::Text(text.clone()),
            Reply::Voice(audio) => Delivered::Voice(audio.path().to_path_buf(), audio.path().exists()),
        };
        self.delivered.push((conversation_id.to_string(), delivered));

        if self.fail_delivery_to.as_deref() == Some(conversation_id) {
            return Err(Error::ElementNotFound("compose box".into()));
        }
        Ok(())
    }
}
