//! Message source and reply sink seams.

use async_trait::async_trait;
use xzero_browser::{BrowserDriver, ChatSurface, InboundMessage};
use xzero_core::Result;

use crate::dispatch::Reply;

/// Lazy, unbounded sequence of inbound messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next inbound message. Errors are not recoverable.
    async fn next_message(&mut self) -> Result<InboundMessage>;

    /// End the sequence and release the underlying session.
    async fn close(&mut self) -> Result<()>;
}

/// Delivers replies back to a conversation.
#[async_trait]
pub trait ReplySink: Send {
    async fn deliver(&mut self, conversation_id: &str, reply: &Reply) -> Result<()>;
}

#[async_trait]
impl<D: BrowserDriver> MessageSource for ChatSurface<D> {
    async fn next_message(&mut self) -> Result<InboundMessage> {
        ChatSurface::next_message(self).await
    }

    async fn close(&mut self) -> Result<()> {
        ChatSurface::close(self).await
    }
}

#[async_trait]
impl<D: BrowserDriver> ReplySink for ChatSurface<D> {
    async fn deliver(&mut self, conversation_id: &str, reply: &Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => self.send_text(conversation_id, text).await,
            Reply::Voice(audio) => self.send_voice(conversation_id, audio.path()).await,
        }
    }
}
