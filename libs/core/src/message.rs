//! Typed model of a Slack message payload.
//!
//! Slack messages arrive as loosely structured JSON. Everything the bridge
//! renders is reduced to the closed [`ContentBlock`] set so each variant has
//! exactly one rendering rule.

use serde::{Deserialize, Serialize};

use crate::is_self_sent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    #[serde(default)]
    pub message: Option<Box<RemoteMessage>>,
    #[serde(default)]
    pub previous_message: Option<Box<RemoteMessage>>,
}

/// What a message event means for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    Emote,
    Changed,
    Deleted,
}

impl RemoteMessage {
    pub fn kind(&self) -> MessageKind {
        match self.subtype.as_deref() {
            Some("message_changed") => MessageKind::Changed,
            Some("message_deleted") => MessageKind::Deleted,
            Some("me_message") => MessageKind::Emote,
            _ => MessageKind::Plain,
        }
    }

    /// Author of the event, looking into the nested edit payloads when the
    /// outer event carries none.
    pub fn sender(&self) -> Option<&str> {
        self.user
            .as_deref()
            .or(self.bot_id.as_deref())
            .or_else(|| self.message.as_ref().and_then(|m| m.sender()))
            .or_else(|| self.previous_message.as_ref().and_then(|m| m.sender()))
    }

    /// Remote event id, with the same nested fallback as [`Self::sender`].
    pub fn event_id(&self) -> Option<&str> {
        self.ts
            .as_deref()
            .or_else(|| self.message.as_ref().and_then(|m| m.ts.as_deref()))
            .or_else(|| self.previous_message.as_ref().and_then(|m| m.ts.as_deref()))
    }

    /// Thread root when this message is a reply inside a thread.
    pub fn thread_root(&self) -> Option<&str> {
        match (self.thread_ts.as_deref(), self.ts.as_deref()) {
            (Some(root), Some(ts)) if root != ts => Some(root),
            (Some(root), None) => Some(root),
            _ => None,
        }
    }

    /// Whether the text carries the marker the bridge puts on its own posts.
    pub fn is_self_sent(&self) -> bool {
        self.text.as_deref().is_some_and(is_self_sent)
    }

    /// Flattens text, attachments, and blocks into renderable content.
    ///
    /// Blocks only contribute when the message has no text of its own,
    /// since Slack mirrors block content into the fallback text.
    pub fn content(&self) -> Vec<ContentBlock> {
        let mut content = Vec::with_capacity(1 + self.attachments.len() + self.blocks.len());
        let text = self.text.as_deref().unwrap_or_default();
        if !text.is_empty() {
            content.push(ContentBlock::Text(text.to_string()));
        }
        content.extend(self.attachments.iter().cloned().map(ContentBlock::Attachment));
        if text.is_empty() {
            content.extend(
                self.blocks
                    .iter()
                    .filter(|block| !matches!(block, Block::Unsupported))
                    .cloned()
                    .map(ContentBlock::Structured),
            );
        }
        content
    }
}

/// Closed set of renderable message parts.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Attachment(Attachment),
    Structured(Block),
}

/// Legacy secondary attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub pretext: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_link: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_link: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub fields: Vec<AttachmentField>,
    #[serde(default)]
    pub actions: Vec<AttachmentAction>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentAction {
    #[serde(default)]
    pub text: String,
}

/// Block Kit layout blocks the bridge knows how to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        #[serde(default)]
        text: Option<TextObject>,
        #[serde(default)]
        fields: Vec<TextObject>,
    },
    Header {
        #[serde(default)]
        text: TextObject,
    },
    Context {
        #[serde(default)]
        elements: Vec<ContextElement>,
    },
    Divider,
    Image {
        #[serde(default)]
        image_url: String,
        #[serde(default)]
        alt_text: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl TextObject {
    pub fn is_markdown(&self) -> bool {
        self.kind == "mrkdwn"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextElement {
    Mrkdwn {
        #[serde(default)]
        text: String,
    },
    PlainText {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        image_url: String,
        #[serde(default)]
        alt_text: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl RemoteFile {
    pub fn is_self_sent(&self) -> bool {
        self.title.as_deref().is_some_and(is_self_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_edit_payload_and_falls_back_to_nested_sender() {
        let msg: RemoteMessage = serde_json::from_value(json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "message": { "user": "U1", "text": "new", "ts": "1.0" },
            "previous_message": { "user": "U1", "text": "old", "ts": "1.0" }
        }))
        .unwrap();
        assert_eq!(msg.kind(), MessageKind::Changed);
        assert_eq!(msg.sender(), Some("U1"));
        assert_eq!(msg.event_id(), Some("1.0"));
    }

    #[test]
    fn unknown_blocks_are_tolerated() {
        let msg: RemoteMessage = serde_json::from_value(json!({
            "channel": "C1",
            "text": "",
            "blocks": [
                { "type": "rich_text", "elements": [] },
                { "type": "header", "text": { "type": "plain_text", "text": "Deploy" } },
                { "type": "divider" }
            ]
        }))
        .unwrap();
        let content = msg.content();
        assert_eq!(content.len(), 2);
        assert!(matches!(content[0], ContentBlock::Structured(Block::Header { .. })));
    }

    #[test]
    fn blocks_are_skipped_when_text_exists() {
        let msg = RemoteMessage {
            text: Some("fallback".into()),
            blocks: vec![Block::Divider],
            attachments: vec![Attachment::default()],
            ..Default::default()
        };
        let content = msg.content();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0], ContentBlock::Text("fallback".into()));
    }

    #[test]
    fn thread_root_ignores_thread_parent() {
        let parent = RemoteMessage {
            ts: Some("1.0".into()),
            thread_ts: Some("1.0".into()),
            ..Default::default()
        };
        assert_eq!(parent.thread_root(), None);
        let reply = RemoteMessage {
            ts: Some("2.0".into()),
            thread_ts: Some("1.0".into()),
            ..Default::default()
        };
        assert_eq!(reply.thread_root(), Some("1.0"));
    }

    #[test]
    fn marked_text_is_self_sent() {
        let msg = RemoteMessage {
            text: Some("\u{fff0}echo".into()),
            ..Default::default()
        };
        assert!(msg.is_self_sent());
        assert!(!RemoteMessage::default().is_self_sent());
    }
}
