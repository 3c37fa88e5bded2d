//! Bounded per-conversation context.
//!
//! Keeps the most recent turns of every conversation so each completion
//! request carries short-term history. When a conversation grows past the
//! cap the oldest turns are dropped first. History lives for the process
//! lifetime only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{ChatMessage, ChatRole};

/// Turns kept per conversation.
pub const MAX_TURNS: usize = 10;

/// Smallest usable cap: one user turn plus its reply.
pub const MIN_TURNS: usize = 2;

/// One exchanged message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Recent history of a single conversation, oldest turn first.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            turns: Vec::new(),
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    fn push(&mut self, turn: ConversationTurn, max_turns: usize) {
        self.turns.push(turn);
        if self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }
}

/// Owns the context of every conversation seen so far.
#[derive(Debug)]
pub struct ConversationContextStore {
    contexts: HashMap<String, ConversationContext>,
    max_turns: usize,
}

impl Default for ConversationContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationContextStore {
    /// Create a store keeping the last `MAX_TURNS` turns per conversation.
    pub fn new() -> Self {
        Self::with_max_turns(MAX_TURNS)
    }

    /// Create a store with a custom cap. Caps below `MIN_TURNS` are raised
    /// to it so a user turn and its reply always fit together.
    pub fn with_max_turns(max_turns: usize) -> Self {
        let max_turns = if max_turns < MIN_TURNS {
            warn!(
                "Context cap {} is below {}, using {}",
                max_turns, MIN_TURNS, MIN_TURNS
            );
            MIN_TURNS
        } else {
            max_turns
        };

        Self {
            contexts: HashMap::new(),
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Number of conversations tracked.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Record a user message, creating the conversation on first use.
    pub fn append_user_turn(&mut self, conversation_id: &str, content: &str) {
        self.append(conversation_id, ConversationTurn::new(ChatRole::User, content));
    }

    /// Record a generated reply. Only call after a successful completion.
    pub fn append_assistant_turn(&mut self, conversation_id: &str, content: &str) {
        self.append(
            conversation_id,
            ConversationTurn::new(ChatRole::Assistant, content),
        );
    }

    /// System instruction first, then the conversation's turns oldest first.
    pub fn build_prompt_messages(
        &self,
        conversation_id: &str,
        system_prompt: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.max_turns + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(self.turns(conversation_id).iter().map(ConversationTurn::to_message));
        messages
    }

    /// Current turns of a conversation; empty if it was never seen.
    pub fn turns(&self, conversation_id: &str) -> &[ConversationTurn] {
        self.contexts
            .get(conversation_id)
            .map(ConversationContext::turns)
            .unwrap_or(&[])
    }

    pub fn get(&self, conversation_id: &str) -> Option<&ConversationContext> {
        self.contexts.get(conversation_id)
    }

    fn append(&mut self, conversation_id: &str, turn: ConversationTurn) {
        let max_turns = self.max_turns;
        let context = self
            .contexts
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationContext::new(conversation_id));
        context.push(turn, max_turns);
        debug!(
            "Conversation {}: {} turns in context",
            conversation_id,
            context.turns.len()
        );
    }
}
