//! Shared domain types for courier: users, threaded direct messages,
//! notifications and edit history.

pub mod api;
pub mod models;

pub use api::{DeletionSummary, MessageUpdate, NewMessage};
pub use models::{Message, MessageHistory, Notification, ThreadNode, UnreadMessage, User};
