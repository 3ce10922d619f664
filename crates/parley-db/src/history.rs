use parley_types::HistoryEntry;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::error::{Entity, Result, StoreError};
use crate::messages;
use crate::models::{self, HISTORY_COLUMNS, HistoryRow};

/// Append-only log of the bodies messages had before each edit.
pub struct HistoryLog<'a> {
    db: &'a Database,
}

impl<'a> HistoryLog<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        message_id: Uuid,
        old_body: &str,
        edited_by: Option<Uuid>,
    ) -> Result<HistoryEntry> {
        self.db.with_tx(|tx| record(tx, message_id, old_body, edited_by))
    }

    /// Every prior body of the message, in the order the edits were applied.
    pub fn history_for(&self, message_id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {HISTORY_COLUMNS} FROM message_history
                 WHERE message_id = ?1
                 ORDER BY rowid ASC"
            ))?;
            let rows = stmt
                .query_map([message_id.to_string()], HistoryRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(HistoryEntry::try_from).collect()
        })
    }

    pub fn entry_count(&self, message_id: Uuid) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_history WHERE message_id = ?1",
                [message_id.to_string()],
                |r| r.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn delete_for_message(&self, message_id: Uuid) -> Result<usize> {
        self.db.with_tx(|tx| delete_for_message(tx, message_id))
    }
}

pub(crate) fn record(
    conn: &Connection,
    message_id: Uuid,
    old_body: &str,
    edited_by: Option<Uuid>,
) -> Result<HistoryEntry> {
    if !messages::exists(conn, message_id)? {
        return Err(StoreError::not_found(Entity::Message, message_id));
    }

    let entry = HistoryEntry {
        id: Uuid::new_v4(),
        message_id,
        old_body: old_body.to_string(),
        edited_at: models::now(),
        edited_by,
    };

    conn.prepare_cached(
        "INSERT INTO message_history (id, message_id, old_body, edited_at, edited_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?
    .execute((
        entry.id.to_string(),
        message_id.to_string(),
        &entry.old_body,
        models::format_ts(&entry.edited_at),
        edited_by.map(|id| id.to_string()),
    ))?;

    debug!("Recorded history entry {} for message {}", entry.id, message_id);
    Ok(entry)
}

pub(crate) fn delete_for_message(conn: &Connection, message_id: Uuid) -> Result<usize> {
    let removed = conn
        .prepare_cached("DELETE FROM message_history WHERE message_id = ?1")?
        .execute([message_id.to_string()])?;
    Ok(removed)
}

/// Clear the editor on entries that outlive the editor's account.
pub(crate) fn forget_editor(conn: &Connection, user_id: Uuid) -> Result<usize> {
    let updated = conn
        .prepare_cached("UPDATE message_history SET edited_by = NULL WHERE edited_by = ?1")?
        .execute([user_id.to_string()])?;
    Ok(updated)
}
