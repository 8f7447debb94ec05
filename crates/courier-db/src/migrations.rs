use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        let tx = conn.transaction()?;
        // Foreign keys are deferred so cascades may delete parents and
        // children in any order inside one transaction.
        tx.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                sender_id   TEXT NOT NULL REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
                receiver_id TEXT NOT NULL REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                edited      INTEGER NOT NULL DEFAULT 0,
                read        INTEGER NOT NULL DEFAULT 0,
                parent_id   TEXT REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
                CHECK (parent_id IS NULL OR parent_id != id)
            );

            CREATE INDEX idx_messages_parent
                ON messages(parent_id, created_at);

            CREATE INDEX idx_messages_receiver_unread
                ON messages(receiver_id, read, created_at);

            CREATE INDEX idx_messages_sender
                ON messages(sender_id, created_at);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
                message_id  TEXT NOT NULL REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, message_id)
            );

            CREATE INDEX idx_notifications_user
                ON notifications(user_id, is_read, created_at);

            CREATE INDEX idx_notifications_message
                ON notifications(message_id);

            CREATE TABLE message_history (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
                old_content TEXT NOT NULL,
                edited_at   TEXT NOT NULL
            );

            CREATE INDEX idx_history_message
                ON message_history(message_id, edited_at);

            CREATE TRIGGER message_history_append_only
                BEFORE UPDATE ON message_history
            BEGIN
                SELECT RAISE(ABORT, 'message_history is append-only');
            END;

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete (schema v{})", SCHEMA_VERSION);
    Ok(())
}
