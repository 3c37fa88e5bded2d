//! Chat completion for the bot: provider selection, LLM calls, context.
//!
//! Completions go to external APIs (OpenAI/Anthropic/Groq). The
//! `ConversationContextStore` keeps the last few turns of every
//! conversation so each prompt carries short-term context.

pub mod completion;
pub mod config;
pub mod context;
pub mod providers;
pub mod types;

pub use completion::{CompletionService, LlmCompletionClient};
pub use config::LLMConfig;
pub use context::{ConversationContext, ConversationContextStore, ConversationTurn, MAX_TURNS};
pub use types::*;
