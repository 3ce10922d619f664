use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Foreign keys carry no ON DELETE actions: every cascade is issued explicitly
/// by the store so its ordering is visible in code.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL,
                receiver_id     TEXT NOT NULL,
                parent_id       TEXT REFERENCES messages(id),
                body            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                edited          INTEGER NOT NULL DEFAULT 0,
                is_read         INTEGER NOT NULL DEFAULT 0,
                version         INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_sender ON messages(sender_id, created_at);
            CREATE INDEX idx_messages_receiver ON messages(receiver_id, is_read, created_at);
            CREATE INDEX idx_messages_parent ON messages(parent_id);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                created_at  TEXT NOT NULL,
                is_read     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_notifications_unread ON notifications(user_id, is_read, created_at);
            CREATE INDEX idx_notifications_message ON notifications(message_id);

            CREATE TABLE message_history (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                old_body    TEXT NOT NULL,
                edited_at   TEXT NOT NULL,
                edited_by   TEXT
            );

            CREATE INDEX idx_history_message ON message_history(message_id, edited_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
