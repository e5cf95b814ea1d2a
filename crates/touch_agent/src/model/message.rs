//! Conversation messages and the image retention policy

use serde::{Deserialize, Serialize};

/// Most recent image-bearing messages allowed to keep their image
pub const MAX_LIVE_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One item of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    /// Image carried as a `data:` URI with base64 PNG payload
    Image { data_uri: String },
}

/// Message body: plain text or an ordered list of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Multimodal(Vec<ContentItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
        }
    }

    /// A multimodal user turn: the text item followed by the image item
    pub fn user_with_image(text: impl Into<String>, data_uri: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Multimodal(vec![
                ContentItem::Text { text: text.into() },
                ContentItem::Image {
                    data_uri: data_uri.into(),
                },
            ]),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }

    pub fn has_image(&self) -> bool {
        match &self.content {
            Content::Text(_) => false,
            Content::Multimodal(items) => items
                .iter()
                .any(|item| matches!(item, ContentItem::Image { .. })),
        }
    }

    /// Concatenation of all text items, in order
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Multimodal(items) => items
                .iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } => Some(text.as_str()),
                    ContentItem::Image { .. } => None,
                })
                .collect(),
        }
    }

    /// Collapse the message to text-only content
    pub fn strip_images(&mut self) {
        if self.has_image() {
            self.content = Content::Text(self.text());
        }
    }

    /// Turn a plain-text user message into text + image in place.
    /// Returns false if the message is not a plain-text user turn.
    pub fn attach_image(&mut self, data_uri: impl Into<String>) -> bool {
        if self.role != Role::User {
            return false;
        }
        let text = match &self.content {
            Content::Text(text) => text.clone(),
            Content::Multimodal(_) => return false,
        };
        *self = Self::user_with_image(text, data_uri);
        true
    }
}

/// Apply the retention policy: walking newest to oldest, every message past
/// the `cap`-th image-bearing one loses its image. Returns how many messages
/// were collapsed.
pub fn prune_images(history: &mut [Message], cap: usize) -> usize {
    let mut seen = 0;
    let mut collapsed = 0;
    for message in history.iter_mut().rev() {
        if !message.has_image() {
            continue;
        }
        seen += 1;
        if seen > cap {
            message.strip_images();
            collapsed += 1;
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_turn(n: usize) -> Message {
        Message {
            role: Role::User,
            content: Content::Multimodal(vec![
                ContentItem::Text {
                    text: format!("step {} ", n),
                },
                ContentItem::Image {
                    data_uri: format!("data:image/png;base64,{}", n),
                },
                ContentItem::Text {
                    text: "screen".to_string(),
                },
            ]),
        }
    }

    #[test]
    fn test_prune_keeps_two_newest_images() {
        let mut history = Vec::new();
        for n in 0..5 {
            history.push(image_turn(n));
            history.push(Message::assistant(format!("reply {}", n)));
        }

        let collapsed = prune_images(&mut history, MAX_LIVE_IMAGES);
        assert_eq!(collapsed, 3);

        let with_images: Vec<usize> = history
            .iter()
            .enumerate()
            .filter(|(_, m)| m.has_image())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(with_images, vec![6, 8]);

        for n in 0..3 {
            assert_eq!(
                history[n * 2].content,
                Content::Text(format!("step {} screen", n))
            );
        }
        assert_eq!(history[1], Message::assistant("reply 0"));
    }

    #[test]
    fn test_prune_is_idempotent_and_noop_under_cap() {
        let mut history = vec![image_turn(0), Message::assistant("ok"), image_turn(1)];
        assert_eq!(prune_images(&mut history, MAX_LIVE_IMAGES), 0);

        history.push(image_turn(2));
        assert_eq!(prune_images(&mut history, MAX_LIVE_IMAGES), 1);
        let snapshot = history.clone();
        assert_eq!(prune_images(&mut history, MAX_LIVE_IMAGES), 0);
        assert_eq!(history, snapshot);
    }

    #[test]
    fn test_attach_image_only_upgrades_plain_user_text() {
        let mut user = Message::user("open settings");
        assert!(user.attach_image("data:image/png;base64,AAAA"));
        assert!(user.has_image());
        assert_eq!(user.text(), "open settings");

        let mut again = user.clone();
        assert!(!again.attach_image("data:image/png;base64,BBBB"));
        assert_eq!(again, user);

        let mut assistant = Message::assistant("done");
        assert!(!assistant.attach_image("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_message_serde_shape() {
        let value = serde_json::to_value(Message::user_with_image("hi", "data:x")).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image");

        let plain: Message = serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(plain, Message::assistant("ok"));
    }
}
