use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters shown by [`Message::preview`].
pub const PREVIEW_CHARS: usize = 20;

/// A registered identity. The subsystem only holds references to users;
/// authentication and profile data live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A direct message between two users, optionally replying to another message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub receiver: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub read: bool,
    pub parent: Option<Uuid>,
}

impl Message {
    /// First characters of the content, cut on a char boundary.
    pub fn preview(&self) -> &str {
        match self.content.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => &self.content[..idx],
            None => &self.content,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From {} to {}: {}",
            self.sender,
            self.receiver,
            self.preview()
        )
    }
}

/// Raised for the receiver whenever a message is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user: Uuid,
    pub message: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a message's content taken right before an edit was applied.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHistory {
    pub id: Uuid,
    pub message: Uuid,
    pub old_content: String,
    pub edited_at: DateTime<Utc>,
}

/// Inbox projection of an unread message: only the fields a listing needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadMessage {
    pub id: Uuid,
    pub sender: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for UnreadMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender: m.sender,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

/// A message and its replies, nested. Children are in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNode {
    pub message: Message,
    pub children: Vec<ThreadNode>,
}

impl ThreadNode {
    pub fn leaf(message: Message) -> Self {
        Self {
            message,
            children: Vec::new(),
        }
    }

    /// Total number of messages in this subtree, root included.
    pub fn message_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Messages of the subtree in depth-first, parent-before-children order.
    pub fn flatten(&self) -> Vec<&Message> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(&node.message);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

// Deep threads would otherwise be dropped recursively.
impl Drop for ThreadNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}
