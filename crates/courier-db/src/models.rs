//! Row mapping between SQLite and the courier-types models.
//!
//! Ids are stored as hyphenated UUID text and timestamps as fixed-width
//! RFC 3339 text (microseconds, `Z` suffix) so that text order is time order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use courier_types::{Message, MessageHistory, Notification, UnreadMessage, User};

pub const USER_COLUMNS: &str = "id, username, created_at";

pub const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, created_at, edited, read, parent_id";

pub const NOTIFICATION_COLUMNS: &str = "id, user_id, message_id, is_read, created_at";

pub const HISTORY_COLUMNS: &str = "id, message_id, old_content, edited_at";

pub fn now() -> DateTime<Utc> {
    // Truncate to the stored precision so returned models equal re-read rows.
    let ts = Utc::now();
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        created_at: ts_at(row, 2)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        sender: uuid_at(row, 1)?,
        receiver: uuid_at(row, 2)?,
        content: row.get(3)?,
        created_at: ts_at(row, 4)?,
        edited: row.get(5)?,
        read: row.get(6)?,
        parent: opt_uuid_at(row, 7)?,
    })
}

pub fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_at(row, 0)?,
        user: uuid_at(row, 1)?,
        message: uuid_at(row, 2)?,
        is_read: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

pub fn history_from_row(row: &Row<'_>) -> rusqlite::Result<MessageHistory> {
    Ok(MessageHistory {
        id: uuid_at(row, 0)?,
        message: uuid_at(row, 1)?,
        old_content: row.get(2)?,
        edited_at: ts_at(row, 3)?,
    })
}

/// Expects `id, sender_id, content, created_at`.
pub fn unread_from_row(row: &Row<'_>) -> rusqlite::Result<UnreadMessage> {
    Ok(UnreadMessage {
        id: uuid_at(row, 0)?,
        sender: uuid_at(row, 1)?,
        content: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_timestamps_sort_chronologically() {
        let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::microseconds(1);

        let a = encode_ts(&early);
        let b = encode_ts(&late);
        assert_eq!(a, "2026-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_now_round_trips_through_text() {
        let ts = now();
        let parsed = DateTime::parse_from_rfc3339(&encode_ts(&ts))
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parsed, ts);
    }
}
