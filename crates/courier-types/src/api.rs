use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub sender: Uuid,
    pub receiver: Uuid,
    pub content: String,
    #[serde(default)]
    pub parent: Option<Uuid>,
}

impl NewMessage {
    pub fn new(sender: Uuid, receiver: Uuid, content: impl Into<String>) -> Self {
        Self {
            sender,
            receiver,
            content: content.into(),
            parent: None,
        }
    }

    pub fn reply_to(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Partial update of a message. Fields left as `None` are untouched.
/// A changed `content` is the only update that produces an edit history entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub read: Option<bool>,
}

impl MessageUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn read(read: bool) -> Self {
        Self {
            read: Some(read),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.read.is_none()
    }
}

// -- Deletes --

/// Rows removed by a cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub messages: usize,
    pub notifications: usize,
    pub history: usize,
}
