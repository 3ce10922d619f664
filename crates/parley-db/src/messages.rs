use std::thread;
use std::time::Duration;

use parley_types::{Message, NewMessage, Thread};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Database;
use crate::error::{Entity, Result, StoreError};
use crate::models::{self, MESSAGE_COLUMNS, MessageRow};
use crate::{history, notifications, threads};

/// Owns message records. Every write here also drives the derived records
/// (notifications on create, history on edit, cleanup on delete) inside the
/// same transaction.
pub struct MessageStore<'a> {
    db: &'a Database,
}

impl<'a> MessageStore<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, new: NewMessage) -> Result<Message> {
        validate_body(&new.body, self.db.config().max_body_len)?;

        let message = self.db.with_tx(|tx| {
            let directory = self.db.directory();
            for user_id in [new.sender_id, new.receiver_id] {
                if !directory.user_exists(tx, user_id)? {
                    return Err(StoreError::not_found(Entity::User, user_id));
                }
            }
            if let Some(parent_id) = new.parent_id {
                if !exists(tx, parent_id)? {
                    return Err(StoreError::not_found(Entity::Message, parent_id));
                }
            }

            let message = Message {
                id: Uuid::new_v4(),
                sender_id: new.sender_id,
                receiver_id: new.receiver_id,
                parent_id: new.parent_id,
                body: new.body,
                created_at: models::now(),
                edited: false,
                read: false,
            };

            tx.prepare_cached(
                "INSERT INTO messages (id, sender_id, receiver_id, parent_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute((
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.parent_id.map(|id| id.to_string()),
                &message.body,
                models::format_ts(&message.created_at),
            ))?;

            notifications::notify(tx, message.receiver_id, message.id)?;
            Ok(message)
        })?;

        self.db.unread_counts().invalidate(message.receiver_id);
        debug!(
            "Created message {} from {} to {}",
            message.id, message.sender_id, message.receiver_id
        );
        Ok(message)
    }

    pub fn get(&self, message_id: Uuid) -> Result<Message> {
        self.db
            .with_conn(|conn| fetch(conn, message_id))?
            .ok_or_else(|| StoreError::not_found(Entity::Message, message_id))
    }

    /// Replace the body of a message, logging the previous body first.
    ///
    /// Editing to the current body changes nothing. Losing a write race is
    /// retried from the read up to `edit_retries` more times before the
    /// conflict is returned.
    pub fn edit(
        &self,
        message_id: Uuid,
        new_body: &str,
        edited_by: Option<Uuid>,
    ) -> Result<Message> {
        validate_body(new_body, self.db.config().max_body_len)?;

        let attempts = self.db.config().edit_retries + 1;
        for attempt in 1..=attempts {
            match self
                .db
                .with_tx(|tx| edit_once(tx, message_id, new_body, edited_by))
            {
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Edit of message {} conflicted (attempt {}/{})",
                        message_id, attempt, attempts
                    );
                    if attempt < attempts {
                        thread::sleep(Duration::from_millis(5 * u64::from(attempt)));
                    }
                }
                other => return other,
            }
        }

        Err(StoreError::Conflict {
            message_id: Some(message_id),
            attempts,
        })
    }

    pub fn mark_read(&self, message_id: Uuid) -> Result<()> {
        self.db.with_tx(|tx| {
            let updated = tx
                .prepare_cached("UPDATE messages SET is_read = 1 WHERE id = ?1")?
                .execute([message_id.to_string()])?;
            if updated == 0 {
                return Err(StoreError::not_found(Entity::Message, message_id));
            }
            Ok(())
        })
    }

    /// Delete a message with its history and notifications. Direct replies
    /// are kept and become thread roots.
    pub fn delete(&self, message_id: Uuid) -> Result<()> {
        let removal = self.db.with_tx(|tx| {
            if !exists(tx, message_id)? {
                return Err(StoreError::not_found(Entity::Message, message_id));
            }
            remove(tx, message_id)
        })?;

        self.db.unread_counts().invalidate_all(removal.notified);
        debug!(
            "Deleted message {} ({} history entries, {} replies orphaned)",
            message_id, removal.history_entries, removal.orphaned_replies
        );
        Ok(())
    }

    pub fn get_thread(&self, root_id: Uuid) -> Result<Thread> {
        self.db.with_conn(|conn| threads::thread_of(conn, root_id))
    }

    /// Messages received by `user_id` and not yet read, oldest first.
    pub fn unread_for(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            query(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE receiver_id = ?1 AND is_read = 0
                     ORDER BY created_at ASC, rowid ASC"
                ),
                [user_id.to_string()],
            )
        })
    }

    /// Every message exchanged between two users in either direction, oldest first.
    pub fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            query(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY created_at ASC, rowid ASC"
                ),
                [a.to_string(), b.to_string()],
            )
        })
    }
}

/// Counts from removing one message and its dependents.
#[derive(Debug, Default)]
pub(crate) struct Removal {
    pub history_entries: usize,
    pub orphaned_replies: usize,
    /// Recipient of every notification removed, one per row.
    pub notified: Vec<Uuid>,
}

/// Snapshot-then-mutate: the old body is logged before the new one is
/// written, and the write only lands if nobody bumped the version since the
/// snapshot was taken.
fn edit_once(
    conn: &Connection,
    message_id: Uuid,
    new_body: &str,
    edited_by: Option<Uuid>,
) -> Result<Message> {
    let (current, version) = conn
        .prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS}, version FROM messages WHERE id = ?1"
        ))?
        .query_row([message_id.to_string()], |row| {
            Ok((MessageRow::from_row(row)?, row.get::<_, i64>(8)?))
        })
        .optional()?
        .ok_or_else(|| StoreError::not_found(Entity::Message, message_id))?;
    let current = Message::try_from(current)?;

    if current.body == new_body {
        return Ok(current);
    }

    history::record(conn, message_id, &current.body, edited_by)?;

    let updated = conn
        .prepare_cached(
            "UPDATE messages SET body = ?1, edited = 1, version = version + 1
             WHERE id = ?2 AND version = ?3",
        )?
        .execute((new_body, message_id.to_string(), version))?;
    if updated == 0 {
        return Err(StoreError::Conflict {
            message_id: Some(message_id),
            attempts: 1,
        });
    }

    debug!("Edited message {} (version {})", message_id, version + 1);
    Ok(Message {
        body: new_body.to_string(),
        edited: true,
        ..current
    })
}

/// Remove one message and everything that hangs off it. The caller owns the
/// transaction and has already checked the message exists.
pub(crate) fn remove(conn: &Connection, message_id: Uuid) -> Result<Removal> {
    let id = message_id.to_string();

    let orphaned_replies = conn
        .prepare_cached("UPDATE messages SET parent_id = NULL WHERE parent_id = ?1")?
        .execute([&id])?;
    let history_entries = history::delete_for_message(conn, message_id)?;
    let notified = notifications::delete_for_message(conn, message_id)?;
    conn.prepare_cached("DELETE FROM messages WHERE id = ?1")?
        .execute([&id])?;

    Ok(Removal {
        history_entries,
        orphaned_replies,
        notified,
    })
}

pub(crate) fn exists(conn: &Connection, message_id: Uuid) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT 1 FROM messages WHERE id = ?1")?
        .query_row([message_id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn fetch(conn: &Connection, message_id: Uuid) -> Result<Option<Message>> {
    let row = conn
        .prepare_cached(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?
        .query_row([message_id.to_string()], MessageRow::from_row)
        .optional()?;
    row.map(Message::try_from).transpose()
}

pub(crate) fn query<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, MessageRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(Message::try_from).collect()
}

fn validate_body(body: &str, max_len: usize) -> Result<()> {
    if body.trim().is_empty() {
        return Err(StoreError::validation("message body must not be empty"));
    }
    let len = body.chars().count();
    if len > max_len {
        return Err(StoreError::validation(format!(
            "message body is {len} characters, limit is {max_len}"
        )));
    }
    Ok(())
}
