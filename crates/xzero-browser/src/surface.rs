//! Chat surface: the chat web app seen as a message source and reply sink.
//!
//! Each pass scans the chat list for unread badges and queues the matching
//! conversations. Messages are read one at a time from the queue: open the
//! chat, take the last message container, and pull either its text or its
//! voice note. Replies are typed (or attached) into the compose box.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use xzero_core::{Error, Result};
use xzero_voice::TransientAudio;

use crate::driver::BrowserDriver;
use crate::types::{ElementHandle, InboundContent, InboundMessage, Selectors};

const ELEMENT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A conversation with unread activity, found during a scan.
#[derive(Debug, Clone)]
struct PendingChat {
    conversation_id: String,
    row: ElementHandle,
}

pub struct ChatSurface<D> {
    driver: D,
    selectors: Selectors,
    audio_dir: PathBuf,
    pending: VecDeque<PendingChat>,
    passes: u64,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<D: BrowserDriver> ChatSurface<D> {
    pub fn new(driver: D, selectors: Selectors, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            selectors,
            audio_dir: audio_dir.into(),
            pending: VecDeque::new(),
            passes: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Delay between scans that found nothing left to read.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Pause after opening a chat and after sending a reply.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Open the chat app and wait for the chat list, which only renders
    /// once the session is logged in (QR scan on first run).
    pub async fn wait_for_login(&mut self, chat_url: &str, timeout: Duration) -> Result<()> {
        self.driver.navigate(chat_url).await?;
        info!("Waiting up to {:?} for login (scan the QR code on first run)", timeout);

        match self
            .driver
            .wait_for_element(&self.selectors.chat_list, timeout)
            .await
        {
            Ok(_) => {
                info!("Logged in to {}", chat_url);
                Ok(())
            }
            Err(Error::Timeout(_)) => Err(Error::Timeout(format!(
                "login to {} not completed within {:?}",
                chat_url, timeout
            ))),
            Err(e) => Err(e),
        }
    }

    /// Next inbound message. Polls at the configured cadence until a
    /// conversation with unread activity turns up.
    pub async fn next_message(&mut self) -> Result<InboundMessage> {
        loop {
            if let Some(message) = self.poll_once().await? {
                return Ok(message);
            }
        }
    }

    /// One step of the pull sequence: read the next queued conversation,
    /// rescanning (after the poll delay) when the queue is empty.
    async fn poll_once(&mut self) -> Result<Option<InboundMessage>> {
        if self.pending.is_empty() {
            if self.passes > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            self.scan_unread().await?;
        }

        while let Some(chat) = self.pending.pop_front() {
            let conversation_id = chat.conversation_id.clone();
            match self.read_last_message(chat).await {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!("Skipping chat {}: {}", conversation_id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn scan_unread(&mut self) -> Result<()> {
        self.passes += 1;
        self.driver.release_handles().await?;

        let badges = self.driver.find_elements(&self.selectors.unread_badge).await?;
        for badge in badges {
            let row = match self
                .driver
                .ancestor(&badge, self.selectors.chat_row_depth)
                .await
            {
                Ok(row) => row,
                // Badge detached between the query and the walk up.
                Err(e) if e.is_transient() => {
                    debug!("Skipping unread badge: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let conversation_id = match self
                .driver
                .get_attribute(&row, &self.selectors.conversation_attribute)
                .await
            {
                Ok(id) => id,
                Err(e) if e.is_transient() => {
                    debug!("Skipping unread chat row: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match conversation_id {
                Some(conversation_id) if !conversation_id.is_empty() => {
                    self.pending.push_back(PendingChat {
                        conversation_id,
                        row,
                    });
                }
                _ => warn!(
                    "Unread chat row has no {} attribute, skipping",
                    self.selectors.conversation_attribute
                ),
            }
        }

        if !self.pending.is_empty() {
            debug!("Scan {} found {} unread chat(s)", self.passes, self.pending.len());
        }
        Ok(())
    }

    /// Open `chat` and extract its latest message. `None` when the chat
    /// shows no message containers.
    async fn read_last_message(&mut self, chat: PendingChat) -> Result<Option<InboundMessage>> {
        self.driver.click(&chat.row).await?;
        tokio::time::sleep(self.settle_delay).await;

        let containers = self
            .driver
            .find_elements(&self.selectors.message_container)
            .await?;
        let Some(last) = containers.last() else {
            warn!("Chat {} has no messages, skipping", chat.conversation_id);
            return Ok(None);
        };

        let markers = self
            .driver
            .find_within(last, &self.selectors.voice_marker)
            .await?;

        let content = match markers.first() {
            Some(marker) => match self.download_voice(&chat.conversation_id, last, marker).await {
                Ok(path) => InboundContent::Voice(path),
                Err(e) => {
                    warn!("Voice note in {} unavailable: {}", chat.conversation_id, e);
                    InboundContent::Unreadable(e.to_string())
                }
            },
            None => {
                let text_nodes = self
                    .driver
                    .find_within(last, &self.selectors.message_text)
                    .await?;
                match text_nodes.first() {
                    Some(node) => InboundContent::Text(self.driver.get_text(node).await?),
                    None => {
                        debug!("Last message in {} has no text", chat.conversation_id);
                        InboundContent::Text(String::new())
                    }
                }
            }
        };

        Ok(Some(InboundMessage {
            conversation_id: chat.conversation_id,
            content,
        }))
    }

    /// Fetch the voice note behind `marker` into the audio directory.
    async fn download_voice(
        &mut self,
        conversation_id: &str,
        container: &ElementHandle,
        marker: &ElementHandle,
    ) -> Result<PathBuf> {
        // The player only attaches its media element once played.
        self.driver.click(marker).await?;
        tokio::time::sleep(self.settle_delay / 2).await;

        let bytes = self.driver.fetch_audio(container).await?;
        let audio = TransientAudio::new(TransientAudio::reserve_path(
            &self.audio_dir,
            "inbound",
            conversation_id,
            "ogg",
        ));
        // A failed write drops `audio`, removing the partial file.
        tokio::fs::write(audio.path(), &bytes).await?;
        debug!("Saved voice note ({} bytes) to {}", bytes.len(), audio.path().display());
        Ok(audio.into_path())
    }

    /// Open the conversation and return an empty compose box.
    async fn open_compose(&mut self, conversation_id: &str) -> Result<ElementHandle> {
        let row = self
            .driver
            .wait_for_element(&self.selectors.chat_row(conversation_id), ELEMENT_TIMEOUT)
            .await?;
        self.driver.click(&row).await?;

        let compose = self
            .driver
            .wait_for_element(&self.selectors.compose_box, ELEMENT_TIMEOUT)
            .await?;
        self.driver.clear(&compose).await?;
        Ok(compose)
    }

    pub async fn send_text(&mut self, conversation_id: &str, text: &str) -> Result<()> {
        let compose = self.open_compose(conversation_id).await?;
        self.driver.send_keys(&compose, text).await?;
        self.driver.press_enter(&compose).await?;
        tokio::time::sleep(self.settle_delay).await;

        info!("Sent text reply to {} ({} chars)", conversation_id, text.len());
        Ok(())
    }

    pub async fn send_voice(&mut self, conversation_id: &str, audio_path: &Path) -> Result<()> {
        let compose = self.open_compose(conversation_id).await?;

        let attach = self
            .driver
            .find_elements(&self.selectors.attach_button)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ElementNotFound(self.selectors.attach_button.clone()))?;
        self.driver.click(&attach).await?;

        let input = self
            .driver
            .wait_for_element(&self.selectors.file_input, ELEMENT_TIMEOUT)
            .await?;
        self.driver.set_file_input(&input, audio_path).await?;
        self.driver.press_enter(&compose).await?;
        tokio::time::sleep(self.settle_delay).await;

        info!("Sent voice reply to {} ({})", conversation_id, audio_path.display());
        Ok(())
    }

    /// Close the browser session.
    pub async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.driver.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    /// One element of the in-memory page.
    #[derive(Default)]
    struct FakeNode {
        name: String,
        selectors: Vec<String>,
        text: String,
        attrs: HashMap<String, String>,
        parent: Option<usize>,
        audio: Option<Vec<u8>>,
        /// Only rendered while this chat row is open.
        shown_with: Option<usize>,
        /// Removed once this chat row has been opened.
        hidden_by: Option<usize>,
    }

    /// In-memory page that records every interaction as `verb:name`.
    #[derive(Default)]
    struct FakePage {
        nodes: Vec<FakeNode>,
        open_chat: Option<usize>,
        opened: Vec<usize>,
        pub actions: Vec<String>,
        pub closed: bool,
        /// `verb:name` interactions that fail as if the node had detached.
        fail_on: Vec<String>,
    }

    impl FakePage {
        fn add(&mut self, node: FakeNode) -> usize {
            self.nodes.push(node);
            self.nodes.len() - 1
        }

        fn node(&self, handle: &ElementHandle) -> Result<&FakeNode> {
            handle
                .0
                .parse::<usize>()
                .ok()
                .and_then(|i| self.nodes.get(i))
                .ok_or_else(|| Error::ElementNotFound(handle.0.clone()))
        }

        fn visible(&self, index: usize) -> bool {
            let node = &self.nodes[index];
            if let Some(row) = node.shown_with {
                if self.open_chat != Some(row) {
                    return false;
                }
            }
            if let Some(row) = node.hidden_by {
                if self.opened.contains(&row) {
                    return false;
                }
            }
            true
        }

        fn is_descendant(&self, mut index: usize, ancestor: usize) -> bool {
            while let Some(parent) = self.nodes[index].parent {
                if parent == ancestor {
                    return true;
                }
                index = parent;
            }
            false
        }

        fn check_detached(&self, verb: &str, handle: &ElementHandle) -> Result<()> {
            let name = &self.node(handle)?.name;
            if self.fail_on.contains(&format!("{}:{}", verb, name)) {
                return Err(Error::ElementNotFound(format!("{} detached", name)));
            }
            Ok(())
        }

        fn record(&mut self, verb: &str, handle: &ElementHandle) -> Result<usize> {
            let index = handle
                .0
                .parse::<usize>()
                .map_err(|_| Error::ElementNotFound(handle.0.clone()))?;
            let name = self.node(handle)?.name.clone();
            self.actions.push(format!("{}:{}", verb, name));
            Ok(index)
        }

        /// Chat list with a row per `(conversation_id, last message)`; the
        /// message is text, or a voice note when `audio` is set.
        fn with_chats(chats: &[(&str, &str, Option<&[u8]>)]) -> Self {
            let mut page = FakePage::default();
            let list = page.add(FakeNode {
                name: "chat-list".into(),
                selectors: vec![Selectors::default().chat_list],
                ..Default::default()
            });
            page.add(FakeNode {
                name: "compose".into(),
                selectors: vec![Selectors::default().compose_box],
                ..Default::default()
            });
            page.add(FakeNode {
                name: "attach".into(),
                selectors: vec![Selectors::default().attach_button],
                ..Default::default()
            });
            page.add(FakeNode {
                name: "file-input".into(),
                selectors: vec![Selectors::default().file_input],
                ..Default::default()
            });

            for (id, text, audio) in chats {
                page.add_chat(list, id, text, *audio);
            }
            page
        }

        fn add_chat(&mut self, list: usize, id: &str, text: &str, audio: Option<&[u8]>) {
            let selectors = Selectors::default();
            let row = self.add(FakeNode {
                name: format!("row-{}", id),
                selectors: vec![selectors.chat_row(id)],
                attrs: HashMap::from([("data-testid".to_string(), id.to_string())]),
                parent: Some(list),
                ..Default::default()
            });
            let cell = self.add(FakeNode {
                name: format!("cell-{}", id),
                parent: Some(row),
                ..Default::default()
            });
            let meta = self.add(FakeNode {
                name: format!("meta-{}", id),
                parent: Some(cell),
                ..Default::default()
            });
            self.add(FakeNode {
                name: format!("badge-{}", id),
                selectors: vec![selectors.unread_badge.clone()],
                parent: Some(meta),
                hidden_by: Some(row),
                ..Default::default()
            });

            self.add(FakeNode {
                name: format!("older-{}", id),
                selectors: vec![selectors.message_container.clone()],
                shown_with: Some(row),
                ..Default::default()
            });
            let container = self.add(FakeNode {
                name: format!("msg-{}", id),
                selectors: vec![selectors.message_container.clone()],
                shown_with: Some(row),
                audio: audio.map(|a| a.to_vec()),
                ..Default::default()
            });
            if audio.is_some() {
                self.add(FakeNode {
                    name: format!("play-{}", id),
                    selectors: vec![selectors.voice_marker.clone()],
                    parent: Some(container),
                    shown_with: Some(row),
                    ..Default::default()
                });
            } else {
                self.add(FakeNode {
                    name: format!("text-{}", id),
                    selectors: vec![selectors.message_text.clone()],
                    text: text.to_string(),
                    parent: Some(container),
                    shown_with: Some(row),
                    ..Default::default()
                });
            }
        }

        fn matching(&self, selector: &str, within: Option<usize>) -> Vec<ElementHandle> {
            (0..self.nodes.len())
                .filter(|&i| self.visible(i))
                .filter(|&i| self.nodes[i].selectors.iter().any(|s| s == selector))
                .filter(|&i| within.map_or(true, |root| self.is_descendant(i, root)))
                .map(|i| ElementHandle(i.to_string()))
                .collect()
        }
    }

    #[async_trait]
    impl BrowserDriver for FakePage {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            self.actions.push(format!("navigate:{}", url));
            Ok(())
        }

        async fn find_elements(&mut self, selector: &str) -> Result<Vec<ElementHandle>> {
            Ok(self.matching(selector, None))
        }

        async fn find_within(
            &mut self,
            element: &ElementHandle,
            selector: &str,
        ) -> Result<Vec<ElementHandle>> {
            let root = element
                .0
                .parse::<usize>()
                .map_err(|_| Error::ElementNotFound(element.0.clone()))?;
            Ok(self.matching(selector, Some(root)))
        }

        async fn ancestor(&mut self, element: &ElementHandle, levels: u32) -> Result<ElementHandle> {
            let mut index = element
                .0
                .parse::<usize>()
                .map_err(|_| Error::ElementNotFound(element.0.clone()))?;
            for _ in 0..levels {
                index = self.nodes[index]
                    .parent
                    .ok_or_else(|| Error::ElementNotFound("ancestor".into()))?;
            }
            Ok(ElementHandle(index.to_string()))
        }

        async fn click(&mut self, element: &ElementHandle) -> Result<()> {
            self.check_detached("click", element)?;
            let index = self.record("click", element)?;
            if self.nodes[index].name.starts_with("row-") {
                self.open_chat = Some(index);
                self.opened.push(index);
            }
            Ok(())
        }

        async fn clear(&mut self, element: &ElementHandle) -> Result<()> {
            self.record("clear", element).map(|_| ())
        }

        async fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<()> {
            self.record("type", element)?;
            self.actions.push(format!("text:{}", text));
            Ok(())
        }

        async fn press_enter(&mut self, element: &ElementHandle) -> Result<()> {
            self.record("enter", element).map(|_| ())
        }

        async fn get_text(&mut self, element: &ElementHandle) -> Result<String> {
            Ok(self.node(element)?.text.clone())
        }

        async fn get_attribute(
            &mut self,
            element: &ElementHandle,
            name: &str,
        ) -> Result<Option<String>> {
            self.check_detached("attr", element)?;
            Ok(self.node(element)?.attrs.get(name).cloned())
        }

        async fn set_file_input(&mut self, element: &ElementHandle, path: &Path) -> Result<()> {
            self.record("attach", element)?;
            self.actions.push(format!("file:{}", path.display()));
            Ok(())
        }

        async fn fetch_audio(&mut self, element: &ElementHandle) -> Result<Vec<u8>> {
            self.node(element)?
                .audio
                .clone()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| Error::ElementNotFound("message has no audio source".into()))
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn surface(page: FakePage, audio_dir: &Path) -> ChatSurface<FakePage> {
        ChatSurface::new(page, Selectors::default(), audio_dir)
            .with_poll_interval(Duration::ZERO)
            .with_settle_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_login_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = surface(FakePage::with_chats(&[]), dir.path());
        surface
            .wait_for_login("https://web.whatsapp.com", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(surface.driver().actions, vec!["navigate:https://web.whatsapp.com"]);
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = surface(FakePage::default(), dir.path());
        let err = surface
            .wait_for_login("https://web.whatsapp.com", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_one_message_per_unread_chat() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::with_chats(&[
            ("c1", "Hi", None),
            ("c2", "", Some(b"OggS-voice".as_slice())),
        ]);
        let mut surface = surface(page, dir.path());

        let first = surface.next_message().await.unwrap();
        assert_eq!(first, InboundMessage::text("c1", "Hi"));

        let second = surface.next_message().await.unwrap();
        assert_eq!(second.conversation_id, "c2");
        let InboundContent::Voice(path) = &second.content else {
            panic!("expected voice, got {:?}", second.content);
        };
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(path).unwrap(), b"OggS-voice");

        let actions = &surface.driver().actions;
        assert!(actions.contains(&"click:row-c1".to_string()));
        assert!(actions.contains(&"click:play-c2".to_string()));
        assert!(surface.pending.is_empty());
    }

    #[tokio::test]
    async fn test_voice_download_failure_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::with_chats(&[("c3", "", Some(b"".as_slice()))]);
        let mut surface = surface(page, dir.path());

        let message = surface.next_message().await.unwrap();
        assert_eq!(message.conversation_id, "c3");
        assert!(matches!(message.content, InboundContent::Unreadable(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_chat_that_fails_to_open_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = FakePage::with_chats(&[("c1", "Hi", None), ("c2", "Hello", None)]);
        page.fail_on.push("click:row-c1".into());
        let mut surface = surface(page, dir.path());

        let message = surface.next_message().await.unwrap();
        assert_eq!(message, InboundMessage::text("c2", "Hello"));
        assert!(surface.pending.is_empty());
    }

    #[tokio::test]
    async fn test_row_detached_during_scan_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = FakePage::with_chats(&[("c1", "Hi", None), ("c2", "Hello", None)]);
        page.fail_on.push("attr:row-c1".into());
        let mut surface = surface(page, dir.path());

        let message = surface.next_message().await.unwrap();
        assert_eq!(message, InboundMessage::text("c2", "Hello"));
        assert!(!surface
            .driver()
            .actions
            .contains(&"click:row-c1".to_string()));
    }

    #[tokio::test]
    async fn test_voice_note_that_cannot_be_saved_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("missing");
        let page = FakePage::with_chats(&[("c4", "", Some(b"OggS-voice".as_slice()))]);
        let mut surface = surface(page, &audio_dir);

        let message = surface.next_message().await.unwrap();
        assert!(matches!(message.content, InboundContent::Unreadable(_)));
        assert!(!audio_dir.exists());
    }

    #[tokio::test]
    async fn test_send_text_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = surface(FakePage::with_chats(&[("c1", "Hi", None)]), dir.path());

        surface.send_text("c1", "Hello! How can I help?").await.unwrap();
        assert_eq!(
            surface.driver().actions,
            vec![
                "click:row-c1",
                "clear:compose",
                "type:compose",
                "text:Hello! How can I help?",
                "enter:compose",
            ]
        );
    }

    #[tokio::test]
    async fn test_send_voice_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("response_c2.mp3");
        std::fs::write(&audio, b"ID3").unwrap();
        let mut surface = surface(FakePage::with_chats(&[("c2", "", None)]), dir.path());

        surface.send_voice("c2", &audio).await.unwrap();
        assert_eq!(
            surface.driver().actions,
            vec![
                "click:row-c2".to_string(),
                "clear:compose".to_string(),
                "click:attach".to_string(),
                "attach:file-input".to_string(),
                format!("file:{}", audio.display()),
                "enter:compose".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_closes_driver() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = surface(FakePage::default(), dir.path());
        surface.close().await.unwrap();
        assert!(surface.driver().closed);
    }
}
