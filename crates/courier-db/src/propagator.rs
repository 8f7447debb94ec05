//! Derived-row side effects of message and user lifecycle events.
//!
//! Every function here takes the connection of an open write transaction
//! (see [`Database::with_conn_mut`](crate::Database::with_conn_mut)). A
//! failure propagates out and rolls back the triggering write with it.

use rusqlite::{Connection, params};
use tracing::debug;
use uuid::Uuid;

use courier_types::{DeletionSummary, Message, MessageHistory, Notification, User};

use crate::Result;
use crate::models::{encode_ts, now};

/// A message row was just inserted: notify its receiver.
///
/// Returns `None` if the receiver already holds a notification for this
/// message, so a redelivered creation never produces a second one.
pub(crate) fn on_create(conn: &Connection, message: &Message) -> Result<Option<Notification>> {
    let notification = Notification {
        id: Uuid::new_v4(),
        user: message.receiver,
        message: message.id,
        is_read: false,
        created_at: now(),
    };

    let inserted = conn.execute(
        "INSERT INTO notifications (id, user_id, message_id, is_read, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)
         ON CONFLICT(user_id, message_id) DO NOTHING",
        params![
            notification.id.to_string(),
            notification.user.to_string(),
            notification.message.to_string(),
            encode_ts(&notification.created_at),
        ],
    )?;

    if inserted == 0 {
        debug!(message_id = %message.id, "notification already exists, skipping");
        return Ok(None);
    }

    debug!(message_id = %message.id, user_id = %message.receiver, "notification created");
    Ok(Some(notification))
}

/// A message is about to be rewritten from `before` to `after`.
///
/// When the content changes, the old content is appended to the history and
/// `after.edited` is set so it is persisted together with the new content.
pub(crate) fn on_update(
    conn: &Connection,
    before: &Message,
    after: &mut Message,
) -> Result<Option<MessageHistory>> {
    if before.content == after.content {
        return Ok(None);
    }

    let entry = MessageHistory {
        id: Uuid::new_v4(),
        message: before.id,
        old_content: before.content.clone(),
        edited_at: now(),
    };

    conn.execute(
        "INSERT INTO message_history (id, message_id, old_content, edited_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.id.to_string(),
            entry.message.to_string(),
            entry.old_content,
            encode_ts(&entry.edited_at),
        ],
    )?;
    after.edited = true;

    debug!(message_id = %before.id, "edit logged to history");
    Ok(Some(entry))
}

/// Delete a message together with every reply below it.
pub(crate) fn on_message_delete(conn: &Connection, message_id: Uuid) -> Result<DeletionSummary> {
    collect_doomed(
        conn,
        "SELECT id FROM messages WHERE id = ?1",
        &message_id.to_string(),
    )?;
    delete_doomed(conn)
}

/// A user is leaving: drop every message they sent or received (with the
/// reply subtrees hanging off them), their notifications, and the edit
/// history of all removed messages.
pub(crate) fn on_user_delete(conn: &Connection, user: &User) -> Result<DeletionSummary> {
    let uid = user.id.to_string();
    collect_doomed(
        conn,
        "SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1",
        &uid,
    )?;
    let mut summary = delete_doomed(conn)?;

    summary.notifications += conn.execute("DELETE FROM notifications WHERE user_id = ?1", [&uid])?;
    conn.execute("DELETE FROM users WHERE id = ?1", [&uid])?;

    debug!(
        user_id = %user.id,
        messages = summary.messages,
        notifications = summary.notifications,
        history = summary.history,
        "user cascade complete"
    );
    Ok(summary)
}

/// Fill `temp.doomed_messages` with the seed messages and all of their
/// descendants. The recursive CTE runs iteratively inside SQLite, and
/// `UNION` keeps it finite even over a corrupted parent chain.
fn collect_doomed(conn: &Connection, seed_sql: &str, seed_param: &str) -> Result<()> {
    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS doomed_messages (id TEXT PRIMARY KEY);
         DELETE FROM temp.doomed_messages;",
    )?;

    let sql = format!(
        "WITH RECURSIVE doomed(id) AS (
             {seed_sql}
             UNION
             SELECT m.id FROM messages m JOIN doomed d ON m.parent_id = d.id
         )
         INSERT INTO temp.doomed_messages (id) SELECT id FROM doomed"
    );
    conn.execute(&sql, [seed_param])?;
    Ok(())
}

fn delete_doomed(conn: &Connection) -> Result<DeletionSummary> {
    let history = conn.execute(
        "DELETE FROM message_history
         WHERE message_id IN (SELECT id FROM temp.doomed_messages)",
        [],
    )?;
    let notifications = conn.execute(
        "DELETE FROM notifications
         WHERE message_id IN (SELECT id FROM temp.doomed_messages)",
        [],
    )?;
    let messages = conn.execute(
        "DELETE FROM messages WHERE id IN (SELECT id FROM temp.doomed_messages)",
        [],
    )?;
    conn.execute("DELETE FROM temp.doomed_messages", [])?;

    Ok(DeletionSummary {
        messages,
        notifications,
        history,
    })
}
