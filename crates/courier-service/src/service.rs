use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use courier_db::Database;
use courier_types::{
    DeletionSummary, Message, MessageHistory, NewMessage, Notification, ThreadNode, UnreadMessage,
    User,
};

use crate::config::Config;
use crate::error::Result;

/// Async facade over [`Database`]. Every call runs the blocking SQLite work
/// on the blocking thread pool and surfaces store errors unchanged.
#[derive(Clone)]
pub struct MessagingService {
    db: Arc<Database>,
}

impl MessagingService {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open_with_readers(&config.db_path, config.reader_pool)?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> courier_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let out = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                e
            })??;
        Ok(out)
    }

    pub async fn register_user(&self, username: impl Into<String>) -> Result<User> {
        let username = username.into();
        self.blocking(move |db| db.create_user(&username)).await
    }

    pub async fn send(
        &self,
        sender: Uuid,
        receiver: Uuid,
        content: impl Into<String>,
        parent: Option<Uuid>,
    ) -> Result<Message> {
        let new = NewMessage {
            sender,
            receiver,
            content: content.into(),
            parent,
        };
        self.blocking(move |db| db.insert_message(new)).await
    }

    pub async fn edit(&self, message_id: Uuid, new_content: impl Into<String>) -> Result<Message> {
        let new_content = new_content.into();
        self.blocking(move |db| db.edit_message(message_id, &new_content))
            .await
    }

    pub async fn delete_message(&self, message_id: Uuid) -> Result<()> {
        let summary = self
            .blocking(move |db| db.delete_message(message_id))
            .await?;
        info!(
            "Deleted message {} with {} replies",
            message_id,
            summary.messages.saturating_sub(1)
        );
        Ok(())
    }

    pub async fn thread(&self, message_id: Uuid) -> Result<ThreadNode> {
        self.blocking(move |db| db.get_threaded_view(message_id))
            .await
    }

    pub async fn replies(&self, message_id: Uuid) -> Result<Vec<Message>> {
        self.blocking(move |db| db.get_all_replies(message_id))
            .await
    }

    pub async fn unread(&self, user_id: Uuid) -> Result<Vec<UnreadMessage>> {
        self.blocking(move |db| db.unread_for(user_id)).await
    }

    pub async fn mark_read(&self, message_id: Uuid) -> Result<Message> {
        self.blocking(move |db| db.mark_read(message_id)).await
    }

    pub async fn open_message(&self, message_id: Uuid, viewer: Uuid) -> Result<Message> {
        self.blocking(move |db| db.open_message(message_id, viewer))
            .await
    }

    pub async fn notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.blocking(move |db| db.notifications_for(user_id, unread_only))
            .await
    }

    pub async fn history(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        self.blocking(move |db| db.history_for(message_id)).await
    }

    /// Hook for the identity component: call after a user account is removed.
    pub async fn on_user_delete(&self, user_id: Uuid) -> Result<DeletionSummary> {
        self.blocking(move |db| db.delete_user(user_id)).await
    }
}
