use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::{
    DeletionSummary, Message, MessageHistory, MessageUpdate, NewMessage, Notification, User,
};

use crate::models::{
    HISTORY_COLUMNS, MESSAGE_COLUMNS, NOTIFICATION_COLUMNS, USER_COLUMNS, encode_ts,
    history_from_row, message_from_row, notification_from_row, now, user_from_row,
};
use crate::{Database, Result, StoreError, propagator, thread};

/// Upper bound for usernames, matching common identity providers.
pub const MAX_USERNAME_LEN: usize = 150;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
            return Err(StoreError::Validation(format!(
                "username must be 1 to {} characters",
                MAX_USERNAME_LEN
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: now(),
        };

        self.with_conn_mut(|conn| {
            if query_user_by_username(conn, &user.username)?.is_some() {
                return Err(StoreError::Integrity(format!(
                    "username already taken: {}",
                    user.username
                )));
            }
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                params![user.id.to_string(), user.username, encode_ts(&user.created_at)],
            )?;
            Ok(())
        })?;

        debug!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.with_conn(|conn| require_user(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_username(conn, username.trim()))
    }

    /// Identity-deletion hook: removes the user and everything tied to them.
    pub fn delete_user(&self, id: Uuid) -> Result<DeletionSummary> {
        let summary = self.with_conn_mut(|conn| {
            let user = require_user(conn, id)?;
            propagator::on_user_delete(conn, &user)
        })?;

        info!(
            "Deleted user {} ({} messages, {} notifications, {} history rows)",
            id, summary.messages, summary.notifications, summary.history
        );
        Ok(summary)
    }

    // -- Messages --

    pub fn insert_message(&self, new: NewMessage) -> Result<Message> {
        validate_content(&new.content)?;

        let message = Message {
            id: Uuid::new_v4(),
            sender: new.sender,
            receiver: new.receiver,
            content: new.content,
            created_at: now(),
            edited: false,
            read: false,
            parent: new.parent,
        };

        self.with_conn_mut(|conn| {
            require_user(conn, message.sender)?;
            require_user(conn, message.receiver)?;
            if let Some(parent) = message.parent {
                if query_message(conn, parent)?.is_none() {
                    return Err(StoreError::Integrity(format!(
                        "parent message does not exist: {}",
                        parent
                    )));
                }
            }

            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at, edited, read, parent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
                params![
                    message.id.to_string(),
                    message.sender.to_string(),
                    message.receiver.to_string(),
                    message.content,
                    encode_ts(&message.created_at),
                    message.parent.map(|p| p.to_string()),
                ],
            )?;

            propagator::on_create(conn, &message)?;
            Ok(())
        })?;

        debug!(message_id = %message.id, parent = ?message.parent, "message stored");
        Ok(message)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.with_conn(|conn| require_message(conn, id))
    }

    /// Apply a partial update. A content change is logged to the edit
    /// history and flags the message as edited in the same transaction.
    pub fn update_message(&self, id: Uuid, update: MessageUpdate) -> Result<Message> {
        if update.is_empty() {
            return self.get_message(id);
        }
        if let Some(content) = &update.content {
            validate_content(content)?;
        }
        self.with_conn_mut(|conn| apply_update(conn, id, &update))
    }

    pub fn edit_message(&self, id: Uuid, new_content: &str) -> Result<Message> {
        self.update_message(id, MessageUpdate::content(new_content))
    }

    /// Move a message under a new parent (or make it a thread root).
    /// Fails when the new parent is missing or lies inside the message's
    /// own reply subtree.
    pub fn reparent_message(&self, id: Uuid, new_parent: Option<Uuid>) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let mut message = require_message(conn, id)?;

            if let Some(parent) = new_parent {
                if query_message(conn, parent)?.is_none() {
                    return Err(StoreError::Integrity(format!(
                        "parent message does not exist: {}",
                        parent
                    )));
                }
                if thread::chain_contains(conn, parent, id)? {
                    warn!(message_id = %id, parent = %parent, "rejected cyclic reparent");
                    return Err(StoreError::Integrity(format!(
                        "message {} cannot become its own ancestor",
                        id
                    )));
                }
            }

            conn.execute(
                "UPDATE messages SET parent_id = ?1 WHERE id = ?2",
                params![new_parent.map(|p| p.to_string()), id.to_string()],
            )?;
            message.parent = new_parent;
            Ok(message)
        })
    }

    /// Delete a message, its whole reply subtree, and their derived rows.
    pub fn delete_message(&self, id: Uuid) -> Result<DeletionSummary> {
        let summary = self.with_conn_mut(|conn| {
            require_message(conn, id)?;
            propagator::on_message_delete(conn, id)
        })?;

        debug!(message_id = %id, removed = summary.messages, "message deleted");
        Ok(summary)
    }

    pub fn sent_messages(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            query_messages_where(conn, "sender_id = ?1", user_id)
        })
    }

    pub fn received_messages(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            query_messages_where(conn, "receiver_id = ?1", user_id)
        })
    }

    // -- Notifications --

    pub fn get_notification(&self, id: Uuid) -> Result<Notification> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], notification_from_row)
                .optional()?
                .ok_or_else(|| StoreError::not_found("notification", id))
        })
    }

    /// Notifications owned by `user_id`, newest first.
    pub fn notifications_for(&self, user_id: Uuid, unread_only: bool) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            let filter = if unread_only { "AND is_read = 0" } else { "" };
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 {filter}
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread_notifications(&self, user_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
                |row| row.get::<_, usize>(0),
            )?;
            Ok(count)
        })
    }

    pub fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            if affected == 0 {
                return Err(StoreError::not_found("notification", id));
            }
            Ok(())
        })
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            require_user(conn, user_id)?;
            let affected = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
            )?;
            Ok(affected)
        })
    }

    pub fn delete_notification(&self, id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("DELETE FROM notifications WHERE id = ?1", [id.to_string()])?;
            if affected == 0 {
                return Err(StoreError::not_found("notification", id));
            }
            Ok(())
        })
    }

    // -- History --

    /// Edit history of a message, oldest snapshot first.
    pub fn history_for(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        self.with_conn(|conn| {
            require_message(conn, message_id)?;
            let sql = format!(
                "SELECT {HISTORY_COLUMNS} FROM message_history
                 WHERE message_id = ?1
                 ORDER BY edited_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([message_id.to_string()], history_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("message content must not be empty".into()));
    }
    Ok(())
}

/// Shared write path for every in-place message mutation. Runs inside the
/// caller's write transaction.
pub(crate) fn apply_update(conn: &Connection, id: Uuid, update: &MessageUpdate) -> Result<Message> {
    let before = require_message(conn, id)?;
    let mut after = before.clone();
    if let Some(content) = &update.content {
        after.content = content.clone();
    }
    if let Some(read) = update.read {
        after.read = read;
    }

    propagator::on_update(conn, &before, &mut after)?;

    if after == before {
        return Ok(before);
    }

    conn.execute(
        "UPDATE messages SET content = ?1, edited = ?2, read = ?3 WHERE id = ?4",
        params![after.content, after.edited, after.read, id.to_string()],
    )?;
    Ok(after)
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> Result<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    conn.query_row(&sql, [id.to_string()], user_from_row)
        .optional()?
        .ok_or_else(|| StoreError::not_found("user", id))
}

pub(crate) fn require_message(conn: &Connection, id: Uuid) -> Result<Message> {
    query_message(conn, id)?.ok_or_else(|| StoreError::not_found("message", id))
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], message_from_row)
        .optional()?;
    Ok(row)
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
    let row = conn.query_row(&sql, [username], user_from_row).optional()?;
    Ok(row)
}

fn query_messages_where(conn: &Connection, filter: &str, user_id: Uuid) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {filter} ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, User, User) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice").unwrap();
        let bob = db.create_user("bob").unwrap();
        (db, alice, bob)
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_users() {
        let (db, alice, _) = setup();

        assert_eq!(db.get_user(alice.id).unwrap(), alice);
        assert_eq!(db.get_user_by_username("alice").unwrap(), Some(alice));
        assert!(db.get_user_by_username("carol").unwrap().is_none());
        assert!(db.get_user(Uuid::new_v4()).unwrap_err().is_not_found());

        assert!(matches!(
            db.create_user("alice"),
            Err(StoreError::Integrity(_))
        ));
        assert!(matches!(db.create_user("   "), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_padded_username_is_stored_and_found_trimmed() {
        let (db, _, _) = setup();

        let carol = db.create_user("  carol ").unwrap();
        assert_eq!(carol.username, "carol");
        assert_eq!(db.get_user_by_username("  carol ").unwrap(), Some(carol.clone()));
        assert_eq!(db.get_user_by_username("carol").unwrap(), Some(carol));
        assert!(matches!(
            db.create_user("carol  "),
            Err(StoreError::Integrity(_))
        ));
    }

    #[test]
    fn test_username_length_limit() {
        let (db, _, _) = setup();

        let longest = "é".repeat(MAX_USERNAME_LEN);
        let user = db.create_user(&longest).unwrap();
        assert_eq!(user.username.chars().count(), MAX_USERNAME_LEN);

        let too_long = "x".repeat(MAX_USERNAME_LEN + 1);
        assert!(matches!(
            db.create_user(&too_long),
            Err(StoreError::Validation(_))
        ));
        assert!(db.get_user_by_username(&too_long).unwrap().is_none());
    }

    #[test]
    fn test_send_creates_one_notification_and_no_history() {
        let (db, alice, bob) = setup();

        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "Hello Bob!"))
            .unwrap();
        assert!(!msg.edited);
        assert!(!msg.read);
        assert_eq!(db.get_message(msg.id).unwrap(), msg);

        let notifications = db.notifications_for(bob.id, false).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].user, bob.id);
        assert_eq!(notifications[0].message, msg.id);
        assert!(!notifications[0].is_read);

        assert!(db.notifications_for(alice.id, false).unwrap().is_empty());
        assert!(db.history_for(msg.id).unwrap().is_empty());
    }

    #[test]
    fn test_send_rejects_bad_input() {
        let (db, alice, bob) = setup();

        assert!(matches!(
            db.insert_message(NewMessage::new(alice.id, bob.id, "  ")),
            Err(StoreError::Validation(_))
        ));
        assert!(
            db.insert_message(NewMessage::new(alice.id, Uuid::new_v4(), "hi"))
                .unwrap_err()
                .is_not_found()
        );
        assert!(matches!(
            db.insert_message(NewMessage::new(alice.id, bob.id, "hi").reply_to(Uuid::new_v4())),
            Err(StoreError::Integrity(_))
        ));
        assert_eq!(count(&db, "messages"), 0);
        assert_eq!(count(&db, "notifications"), 0);
    }

    #[test]
    fn test_edit_logs_history_once() {
        let (db, alice, bob) = setup();
        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "A"))
            .unwrap();

        let edited = db.edit_message(msg.id, "B").unwrap();
        assert_eq!(edited.content, "B");
        assert!(edited.edited);

        let history = db.history_for(msg.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_content, "A");
        assert_eq!(history[0].message, msg.id);

        // Editing does not notify again.
        assert_eq!(db.notifications_for(bob.id, false).unwrap().len(), 1);
    }

    #[test]
    fn test_edit_to_same_content_is_noop() {
        let (db, alice, bob) = setup();
        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "A"))
            .unwrap();

        let same = db.edit_message(msg.id, "A").unwrap();
        assert!(!same.edited);
        assert!(db.history_for(msg.id).unwrap().is_empty());
        assert_eq!(db.get_message(msg.id).unwrap(), msg);
    }

    #[test]
    fn test_history_accumulates_in_order() {
        let (db, alice, bob) = setup();
        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "v1"))
            .unwrap();
        db.edit_message(msg.id, "v2").unwrap();
        db.edit_message(msg.id, "v3").unwrap();

        let old: Vec<String> = db
            .history_for(msg.id)
            .unwrap()
            .into_iter()
            .map(|h| h.old_content)
            .collect();
        assert_eq!(old, vec!["v1", "v2"]);
        assert_eq!(db.get_message(msg.id).unwrap().content, "v3");
    }

    #[test]
    fn test_edit_rejects_empty_and_missing() {
        let (db, alice, bob) = setup();
        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "A"))
            .unwrap();

        assert!(matches!(
            db.edit_message(msg.id, ""),
            Err(StoreError::Validation(_))
        ));
        assert!(db.edit_message(Uuid::new_v4(), "B").unwrap_err().is_not_found());
    }

    #[test]
    fn test_failed_history_write_rolls_back_edit() {
        let (db, alice, bob) = setup();
        let msg = db
            .insert_message(NewMessage::new(alice.id, bob.id, "A"))
            .unwrap();
        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER fail_history BEFORE INSERT ON message_history
                 BEGIN SELECT RAISE(ABORT, 'history unavailable'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            db.edit_message(msg.id, "B"),
            Err(StoreError::TransactionFailure(_))
        ));
        let stored = db.get_message(msg.id).unwrap();
        assert_eq!(stored.content, "A");
        assert!(!stored.edited);
    }

    #[test]
    fn test_failed_notification_write_rolls_back_send() {
        let (db, alice, bob) = setup();
        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER fail_notify BEFORE INSERT ON notifications
                 BEGIN SELECT RAISE(ABORT, 'notifications unavailable'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            db.insert_message(NewMessage::new(alice.id, bob.id, "hi")),
            Err(StoreError::TransactionFailure(_))
        ));
        assert_eq!(count(&db, "messages"), 0);
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let (db, alice, bob) = setup();
        let root = db
            .insert_message(NewMessage::new(alice.id, bob.id, "root"))
            .unwrap();
        let child = db
            .insert_message(NewMessage::new(bob.id, alice.id, "child").reply_to(root.id))
            .unwrap();
        let grandchild = db
            .insert_message(NewMessage::new(alice.id, bob.id, "grandchild").reply_to(child.id))
            .unwrap();

        assert!(matches!(
            db.reparent_message(root.id, Some(grandchild.id)),
            Err(StoreError::Integrity(_))
        ));
        assert!(matches!(
            db.reparent_message(root.id, Some(root.id)),
            Err(StoreError::Integrity(_))
        ));
        assert!(matches!(
            db.reparent_message(root.id, Some(Uuid::new_v4())),
            Err(StoreError::Integrity(_))
        ));

        let moved = db.reparent_message(grandchild.id, Some(root.id)).unwrap();
        assert_eq!(moved.parent, Some(root.id));
        let detached = db.reparent_message(child.id, None).unwrap();
        assert_eq!(detached.parent, None);
        assert_eq!(db.get_message(child.id).unwrap().parent, None);
    }

    #[test]
    fn test_delete_message_cascades_to_replies() {
        let (db, alice, bob) = setup();
        let root = db
            .insert_message(NewMessage::new(alice.id, bob.id, "root"))
            .unwrap();
        let reply = db
            .insert_message(NewMessage::new(bob.id, alice.id, "reply").reply_to(root.id))
            .unwrap();
        let nested = db
            .insert_message(NewMessage::new(alice.id, bob.id, "nested").reply_to(reply.id))
            .unwrap();
        let other = db
            .insert_message(NewMessage::new(alice.id, bob.id, "unrelated"))
            .unwrap();
        db.edit_message(nested.id, "nested, edited").unwrap();

        let summary = db.delete_message(reply.id).unwrap();
        assert_eq!(
            summary,
            DeletionSummary {
                messages: 2,
                notifications: 2,
                history: 1,
            }
        );

        assert!(db.get_message(reply.id).unwrap_err().is_not_found());
        assert!(db.get_message(nested.id).unwrap_err().is_not_found());
        assert!(db.get_message(root.id).is_ok());
        assert!(db.get_message(other.id).is_ok());
        assert_eq!(count(&db, "notifications"), 2);
        assert!(db.delete_message(reply.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_user_cascades() {
        let (db, alice, bob) = setup();
        let carol = db.create_user("carol").unwrap();

        let to_bob = db
            .insert_message(NewMessage::new(alice.id, bob.id, "hi bob"))
            .unwrap();
        db.insert_message(NewMessage::new(bob.id, alice.id, "hi alice"))
            .unwrap();
        // Carol's reply hangs off Alice's message and goes with it.
        db.insert_message(NewMessage::new(carol.id, bob.id, "me too").reply_to(to_bob.id))
            .unwrap();
        let kept = db
            .insert_message(NewMessage::new(bob.id, carol.id, "just us"))
            .unwrap();
        db.edit_message(to_bob.id, "hello bob").unwrap();

        let summary = db.delete_user(alice.id).unwrap();
        assert_eq!(summary.messages, 3);
        assert_eq!(summary.history, 1);

        assert!(db.get_user(alice.id).unwrap_err().is_not_found());
        assert!(db.get_message(to_bob.id).unwrap_err().is_not_found());
        assert!(db.received_messages(bob.id).unwrap().is_empty());
        assert_eq!(db.sent_messages(bob.id).unwrap(), vec![kept.clone()]);
        assert!(db.notifications_for(bob.id, false).unwrap().is_empty());
        assert_eq!(db.notifications_for(carol.id, false).unwrap().len(), 1);
        assert_eq!(count(&db, "message_history"), 0);
        assert!(db.delete_user(alice.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_notification_read_state() {
        let (db, alice, bob) = setup();
        db.insert_message(NewMessage::new(alice.id, bob.id, "one"))
            .unwrap();
        db.insert_message(NewMessage::new(alice.id, bob.id, "two"))
            .unwrap();
        assert_eq!(db.count_unread_notifications(bob.id).unwrap(), 2);

        let newest = db.notifications_for(bob.id, true).unwrap()[0].clone();
        db.mark_notification_read(newest.id).unwrap();
        assert!(db.get_notification(newest.id).unwrap().is_read);
        assert_eq!(db.count_unread_notifications(bob.id).unwrap(), 1);

        assert_eq!(db.mark_all_notifications_read(bob.id).unwrap(), 1);
        assert_eq!(db.count_unread_notifications(bob.id).unwrap(), 0);
        assert_eq!(db.notifications_for(bob.id, false).unwrap().len(), 2);

        db.delete_notification(newest.id).unwrap();
        assert!(db.get_notification(newest.id).unwrap_err().is_not_found());
        assert!(db.mark_notification_read(newest.id).unwrap_err().is_not_found());
    }
}
