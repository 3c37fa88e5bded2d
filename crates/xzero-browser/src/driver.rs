//! Browser driver abstraction.
//!
//! Everything the chat surface needs from a browser, expressed over opaque
//! element handles. `CdpDriver` is the real implementation; tests use an
//! in-memory page.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use xzero_core::{Error, Result};

use crate::types::ElementHandle;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// All elements matching `selector`, in document order.
    async fn find_elements(&mut self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// Descendants of `element` matching `selector`.
    async fn find_within(
        &mut self,
        element: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>>;

    /// The element `levels` parents above `element`.
    async fn ancestor(&mut self, element: &ElementHandle, levels: u32) -> Result<ElementHandle>;

    async fn click(&mut self, element: &ElementHandle) -> Result<()>;

    /// Empty an input or contenteditable element.
    async fn clear(&mut self, element: &ElementHandle) -> Result<()>;

    /// Type `text` into `element`.
    async fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<()>;

    async fn press_enter(&mut self, element: &ElementHandle) -> Result<()>;

    /// Rendered text of `element`.
    async fn get_text(&mut self, element: &ElementHandle) -> Result<String>;

    async fn get_attribute(&mut self, element: &ElementHandle, name: &str)
        -> Result<Option<String>>;

    /// Attach a local file to a file input.
    async fn set_file_input(&mut self, element: &ElementHandle, path: &Path) -> Result<()>;

    /// Raw bytes of the audio media inside `element`.
    async fn fetch_audio(&mut self, element: &ElementHandle) -> Result<Vec<u8>>;

    /// Invalidate every handle handed out so far.
    async fn release_handles(&mut self) -> Result<()> {
        Ok(())
    }

    /// End the session and stop the browser.
    async fn close(&mut self) -> Result<()>;

    /// Poll until an element matching `selector` appears.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementHandle> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(first) = self.find_elements(selector).await?.into_iter().next() {
                return Ok(first);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no element matched {} within {:?}",
                    selector, timeout
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
