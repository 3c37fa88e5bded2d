//! Browser automation: Chrome lifecycle, DevTools protocol, chat surface.
//!
//! Drives a Chromium instance with a persistent profile so the chat web
//! app stays logged in between runs. `ChatSurface` turns the page into a
//! source of unread messages and a sink for replies.

pub mod cdp;
pub mod config;
pub mod driver;
pub mod surface;
pub mod types;

pub use cdp::CdpDriver;
pub use config::BrowserConfig;
pub use driver::BrowserDriver;
pub use surface::ChatSurface;
pub use types::*;
