//! The bot loop.
//!
//! Strictly sequential: pull one message, dispatch it, deliver the reply,
//! release its audio, repeat. Shutdown is only observed while waiting for
//! the next message, so an exchange in progress always completes.

use std::future::Future;

use tracing::{debug, error, info, warn};
use xzero_browser::{InboundContent, InboundMessage};
use xzero_core::Result;
use xzero_voice::TransientAudio;

use crate::channel::{MessageSource, ReplySink};
use crate::dispatch::ReplyDispatcher;

/// Counters for one run of the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BotStats {
    pub received: u64,
    pub replied: u64,
    pub skipped: u64,
    pub delivery_failures: u64,
}

pub struct Bot<C> {
    channel: C,
    dispatcher: ReplyDispatcher,
    stats: BotStats,
}

impl<C: MessageSource + ReplySink> Bot<C> {
    pub fn new(channel: C, dispatcher: ReplyDispatcher) -> Self {
        Self {
            channel,
            dispatcher,
            stats: BotStats::default(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn dispatcher(&self) -> &ReplyDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> BotStats {
        self.stats
    }

    /// Run until `shutdown` resolves or the source fails. The channel is
    /// closed either way; a source failure is returned.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Bot loop started");

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                next = self.channel.next_message() => next,
            };

            match next {
                Ok(message) => self.handle(message).await,
                Err(e) => {
                    error!("Message source failed, stopping: {}", e);
                    break Err(e);
                }
            }
        };

        if let Err(e) = self.channel.close().await {
            warn!("Failed to close chat session: {}", e);
        }
        info!(
            "Bot loop stopped: {} received, {} replied, {} skipped, {} delivery failures",
            self.stats.received, self.stats.replied, self.stats.skipped, self.stats.delivery_failures
        );
        outcome
    }

    async fn handle(&mut self, message: InboundMessage) {
        self.stats.received += 1;

        // Inbound audio lives exactly as long as this exchange.
        let inbound_audio = match &message.content {
            InboundContent::Voice(path) => Some(TransientAudio::new(path.clone())),
            InboundContent::Text(text) if text.trim().is_empty() => {
                debug!("Skipping empty message from {}", message.conversation_id);
                self.stats.skipped += 1;
                return;
            }
            _ => None,
        };

        let reply = self.dispatcher.dispatch(&message).await;

        match self.channel.deliver(&message.conversation_id, &reply).await {
            Ok(()) => self.stats.replied += 1,
            Err(e) => {
                error!("Failed to deliver reply to {}: {}", message.conversation_id, e);
                self.stats.delivery_failures += 1;
            }
        }

        if let Err(e) = reply.release() {
            warn!("Failed to remove reply audio: {}", e);
        }
        if let Some(audio) = inbound_audio {
            if let Err(e) = audio.release() {
                warn!("Failed to remove inbound audio: {}", e);
            }
        }
    }
}
