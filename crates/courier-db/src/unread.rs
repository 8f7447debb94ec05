use tracing::debug;
use uuid::Uuid;

use courier_types::{Message, MessageUpdate, UnreadMessage};

use crate::models::unread_from_row;
use crate::queries::{apply_update, require_message, require_user};
use crate::{Database, Result};

impl Database {
    /// Unread inbox of `user_id`, oldest first, projected to the listing fields.
    pub fn unread_for(&self, user_id: Uuid) -> Result<Vec<UnreadMessage>> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, content, created_at FROM messages
                 WHERE receiver_id = ?1 AND read = 0
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], unread_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread(&self, user_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
                [user_id.to_string()],
                |row| row.get::<_, usize>(0),
            )?;
            Ok(count)
        })
    }

    /// Flip only the `read` flag. Never touches content or edit history.
    pub fn mark_read(&self, message_id: Uuid) -> Result<Message> {
        self.update_message(message_id, MessageUpdate::read(true))
    }

    /// Open a message on behalf of `viewer`. When the viewer is the
    /// receiver, the message and the viewer's notifications for it are
    /// marked read in one transaction; anyone else just gets the message.
    pub fn open_message(&self, message_id: Uuid, viewer: Uuid) -> Result<Message> {
        self.with_conn_mut(|conn| {
            require_user(conn, viewer)?;
            let message = require_message(conn, message_id)?;
            if message.receiver != viewer {
                return Ok(message);
            }

            let opened = apply_update(conn, message_id, &MessageUpdate::read(true))?;
            let cleared = conn.execute(
                "UPDATE notifications SET is_read = 1
                 WHERE message_id = ?1 AND user_id = ?2 AND is_read = 0",
                [message_id.to_string(), viewer.to_string()],
            )?;
            debug!(message_id = %message_id, notifications = cleared, "message opened");
            Ok(opened)
        })
    }
}
