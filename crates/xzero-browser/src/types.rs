//! Browser types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Remote reference to a DOM element (a DevTools `RemoteObjectId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn object_id(&self) -> &str {
        &self.0
    }
}

/// CSS selectors for the chat web app. Defaults target WhatsApp Web.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selectors {
    /// Present once the user is logged in.
    #[serde(default = "default_chat_list")]
    pub chat_list: String,
    /// Unread counter badge on a chat row.
    #[serde(default = "default_unread_badge")]
    pub unread_badge: String,
    /// How many parents up from the badge the chat row sits.
    #[serde(default = "default_chat_row_depth")]
    pub chat_row_depth: u32,
    /// Attribute on the chat row that identifies the conversation.
    #[serde(default = "default_conversation_attribute")]
    pub conversation_attribute: String,
    #[serde(default = "default_message_container")]
    pub message_container: String,
    /// Marks a voice note inside a message container.
    #[serde(default = "default_voice_marker")]
    pub voice_marker: String,
    #[serde(default = "default_message_text")]
    pub message_text: String,
    #[serde(default = "default_compose_box")]
    pub compose_box: String,
    #[serde(default = "default_attach_button")]
    pub attach_button: String,
    #[serde(default = "default_file_input")]
    pub file_input: String,
}

fn default_chat_list() -> String {
    r#"[data-testid="chat-list"]"#.into()
}
fn default_unread_badge() -> String {
    r#"[data-testid="unread-count"]"#.into()
}
fn default_chat_row_depth() -> u32 {
    3
}
fn default_conversation_attribute() -> String {
    "data-testid".into()
}
fn default_message_container() -> String {
    r#"[data-testid="msg-container"]"#.into()
}
fn default_voice_marker() -> String {
    r#"[data-testid="audio-play"]"#.into()
}
fn default_message_text() -> String {
    r#"[data-testid="message-text"]"#.into()
}
fn default_compose_box() -> String {
    r#"[data-testid="conversation-compose-box-input"]"#.into()
}
fn default_attach_button() -> String {
    r#"[data-testid="attach-button"]"#.into()
}
fn default_file_input() -> String {
    r#"input[type="file"]"#.into()
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            chat_list: default_chat_list(),
            unread_badge: default_unread_badge(),
            chat_row_depth: default_chat_row_depth(),
            conversation_attribute: default_conversation_attribute(),
            message_container: default_message_container(),
            voice_marker: default_voice_marker(),
            message_text: default_message_text(),
            compose_box: default_compose_box(),
            attach_button: default_attach_button(),
            file_input: default_file_input(),
        }
    }
}

impl Selectors {
    /// Selector that finds a chat row again by its conversation id.
    pub fn chat_row(&self, conversation_id: &str) -> String {
        format!(
            r#"[{}="{}"]"#,
            self.conversation_attribute,
            conversation_id.replace('\\', "\\\\").replace('"', "\\\"")
        )
    }
}

/// Payload of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    /// Voice note downloaded to a transient file owned by the receiver.
    Voice(PathBuf),
    /// A message was there but could not be read (e.g. the voice note
    /// failed to download).
    Unreadable(String),
}

/// The latest message of a conversation with unread activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub content: InboundContent,
}

impl InboundMessage {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: InboundContent::Text(text.into()),
        }
    }

    pub fn voice(conversation_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: InboundContent::Voice(path.into()),
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self.content, InboundContent::Voice(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_row_selector() {
        let selectors = Selectors::default();
        assert_eq!(selectors.chat_row("list-item-4"), r#"[data-testid="list-item-4"]"#);
        assert_eq!(selectors.chat_row(r#"a"b"#), r#"[data-testid="a\"b"]"#);
    }

    #[test]
    fn test_partial_selector_override() {
        let selectors: Selectors =
            serde_json::from_str(r#"{"composeBox": "div[contenteditable]", "chatRowDepth": 2}"#)
                .unwrap();
        assert_eq!(selectors.compose_box, "div[contenteditable]");
        assert_eq!(selectors.chat_row_depth, 2);
        assert_eq!(selectors.chat_list, r#"[data-testid="chat-list"]"#);
    }
}
