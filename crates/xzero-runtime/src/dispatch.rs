//! Reply dispatch policy.
//!
//! Turns one inbound message into one reply:
//! voice → transcribe → record user turn → complete → record assistant
//! turn → synthesize. Every collaborator failure becomes a fallback reply
//! instead of an error, so the loop always has something to send.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use xzero_browser::{InboundContent, InboundMessage};
use xzero_chat::{CompletionParams, CompletionService, ConversationContextStore};
use xzero_voice::{SpeechToText, TextToSpeech, TransientAudio};

pub const SYSTEM_PROMPT: &str = "You are a highly intelligent and helpful AI assistant integrated into a chat app. \
You can understand and communicate in multiple languages, help with various tasks, \
and maintain engaging conversations while being ethical and safe.";

pub const VOICE_NOT_UNDERSTOOD: &str = "Sorry, I couldn't understand the voice message.";

pub const COMPLETION_FALLBACK: &str =
    "I apologize, but I'm having trouble processing your request at the moment. Please try again later.";

pub const PROCESSING_FALLBACK: &str =
    "Sorry, I encountered an error while processing your message.";

/// What goes back to the conversation.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    /// Synthesized audio; the holder releases the file once delivered.
    Voice(TransientAudio),
}

impl Reply {
    pub fn is_voice(&self) -> bool {
        matches!(self, Reply::Voice(_))
    }

    /// Text content, `None` for voice replies.
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            Reply::Voice(_) => None,
        }
    }

    /// Delete any file backing this reply.
    pub fn release(self) -> std::io::Result<()> {
        match self {
            Reply::Text(_) => Ok(()),
            Reply::Voice(audio) => audio.release(),
        }
    }
}

/// Owns the conversation context and the collaborators a reply needs.
pub struct ReplyDispatcher {
    store: ConversationContextStore,
    completion: Arc<dyn CompletionService>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    params: CompletionParams,
    system_prompt: String,
    audio_dir: PathBuf,
}

impl ReplyDispatcher {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        params: CompletionParams,
        audio_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store: ConversationContextStore::new(),
            completion,
            stt,
            tts,
            params,
            system_prompt: SYSTEM_PROMPT.to_string(),
            audio_dir: audio_dir.into(),
        }
    }

    /// Replace the context store (e.g. one with a different turn cap).
    pub fn with_store(mut self, store: ConversationContextStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &ConversationContextStore {
        &self.store
    }

    pub async fn dispatch(&mut self, message: &InboundMessage) -> Reply {
        let conversation_id = message.conversation_id.as_str();

        let (text, voice_reply) = match &message.content {
            InboundContent::Text(text) => (text.clone(), false),
            InboundContent::Voice(path) => match self.stt.transcribe(path).await {
                Ok(transcript) if !transcript.trim().is_empty() => {
                    debug!("Transcribed voice note from {}: {:?}", conversation_id, transcript);
                    (transcript, true)
                }
                Ok(_) => {
                    warn!("Empty transcript for voice note from {}", conversation_id);
                    return Reply::Text(VOICE_NOT_UNDERSTOOD.to_string());
                }
                Err(e) => {
                    warn!(
                        "Transcription via {} failed for {}: {}",
                        self.stt.provider_name(),
                        conversation_id,
                        e
                    );
                    return Reply::Text(VOICE_NOT_UNDERSTOOD.to_string());
                }
            },
            InboundContent::Unreadable(reason) => {
                warn!("Unreadable message from {}: {}", conversation_id, reason);
                return Reply::Text(PROCESSING_FALLBACK.to_string());
            }
        };

        let reply_text = self.generate(conversation_id, &text).await;

        if voice_reply {
            self.synthesize(conversation_id, reply_text).await
        } else {
            Reply::Text(reply_text)
        }
    }

    /// Record the user turn, complete over the context, and record the
    /// assistant turn on success.
    async fn generate(&mut self, conversation_id: &str, text: &str) -> String {
        self.store.append_user_turn(conversation_id, text);
        let messages = self
            .store
            .build_prompt_messages(conversation_id, &self.system_prompt);

        match self.completion.complete(&messages, &self.params).await {
            Ok(reply) => {
                self.store.append_assistant_turn(conversation_id, &reply);
                info!(
                    "Completed reply for {} ({} turns in context)",
                    conversation_id,
                    self.store.turns(conversation_id).len()
                );
                reply
            }
            Err(e) => {
                warn!("Completion failed for {}: {}", conversation_id, e);
                COMPLETION_FALLBACK.to_string()
            }
        }
    }

    /// Voice rendition of `text`, or the text itself if synthesis fails.
    async fn synthesize(&self, conversation_id: &str, text: String) -> Reply {
        let path = TransientAudio::reserve_path(
            &self.audio_dir,
            "response",
            conversation_id,
            self.tts.extension(),
        );

        match self.tts.synthesize(&text, &path).await {
            Ok(()) => Reply::Voice(TransientAudio::new(path)),
            Err(e) => {
                warn!(
                    "Synthesis via {} failed for {}, replying with text: {}",
                    self.tts.provider_name(),
                    conversation_id,
                    e
                );
                if let Err(e) = TransientAudio::new(path).release() {
                    warn!("Failed to remove partial audio: {}", e);
                }
                Reply::Text(text)
            }
        }
    }
}
