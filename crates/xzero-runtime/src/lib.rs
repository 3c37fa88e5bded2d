//! Bot runtime: reply dispatch and the polling loop.
//!
//! `ReplyDispatcher` decides what to answer (transcribe, complete,
//! synthesize, fall back). `Bot` pulls inbound messages from a
//! `MessageSource`, dispatches them one at a time and hands the replies to
//! a `ReplySink`.

pub mod bot;
pub mod channel;
pub mod dispatch;

#[cfg(test)]
pub(crate) mod testing;

pub use bot::{Bot, BotStats};
pub use channel::{MessageSource, ReplySink};
pub use dispatch::{Reply, ReplyDispatcher, SYSTEM_PROMPT};
