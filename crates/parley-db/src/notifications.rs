use std::collections::VecDeque;

use parley_types::Notification;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::error::{Entity, Result, StoreError};
use crate::messages;
use crate::models::{self, NOTIFICATION_COLUMNS, NotificationRow};

/// Per-recipient notifications raised when messages are created.
pub struct NotificationSink<'a> {
    db: &'a Database,
}

impl<'a> NotificationSink<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Always inserts a fresh unread notification; repeated calls for the same
    /// pair produce distinct rows. The user must be known to the directory.
    pub fn notify(&self, user_id: Uuid, message_id: Uuid) -> Result<Notification> {
        let notification = self.db.with_tx(|tx| {
            if !self.db.directory().user_exists(tx, user_id)? {
                return Err(StoreError::not_found(Entity::User, user_id));
            }
            notify(tx, user_id, message_id)
        })?;
        self.db.unread_counts().invalidate(user_id);
        Ok(notification)
    }

    /// Unread notifications for `user_id`, oldest first, fetched a page at a
    /// time. Dropping the iterator early leaves nothing locked.
    pub fn unread_for(&self, user_id: Uuid) -> UnreadNotifications<'a> {
        UnreadNotifications {
            db: self.db,
            user_id,
            page_size: self.db.config().unread_page_size.max(1),
            cursor: (String::new(), 0),
            page: VecDeque::new(),
            done: false,
        }
    }

    pub fn unread_count(&self, user_id: Uuid) -> Result<usize> {
        let cache = self.db.unread_counts();
        if let Some(count) = cache.get(user_id) {
            return Ok(count);
        }

        let generation = cache.generation();
        let count = self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
                |r| r.get(0),
            )?;
            Ok(count as usize)
        })?;
        cache.insert(user_id, count, generation);
        Ok(count)
    }

    pub fn for_message(&self, message_id: Uuid) -> Result<Vec<Notification>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE message_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([message_id.to_string()], NotificationRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Notification::try_from).collect()
        })
    }

    pub fn mark_read(&self, notification_id: Uuid) -> Result<()> {
        let user_id = self.db.with_tx(|tx| {
            let user_id: Option<String> = tx
                .query_row(
                    "UPDATE notifications SET is_read = 1 WHERE id = ?1 RETURNING user_id",
                    [notification_id.to_string()],
                    |r| r.get(0),
                )
                .optional()?;
            user_id
                .ok_or_else(|| StoreError::not_found(Entity::Notification, notification_id))
                .and_then(|raw| models::parse_uuid(&raw))
        })?;

        self.db.unread_counts().invalidate(user_id);
        Ok(())
    }

    /// Mark every unread notification of the user as read. Returns how many changed.
    pub fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        let changed = self.db.with_tx(|tx| {
            Ok(tx.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
            )?)
        })?;
        self.db.unread_counts().invalidate(user_id);
        Ok(changed)
    }

    pub fn delete_for_message(&self, message_id: Uuid) -> Result<usize> {
        let recipients = self.db.with_tx(|tx| delete_for_message(tx, message_id))?;
        let removed = recipients.len();
        self.db.unread_counts().invalidate_all(recipients);
        Ok(removed)
    }
}

pub(crate) fn notify(conn: &Connection, user_id: Uuid, message_id: Uuid) -> Result<Notification> {
    if !messages::exists(conn, message_id)? {
        return Err(StoreError::not_found(Entity::Message, message_id));
    }

    let notification = Notification {
        id: Uuid::new_v4(),
        user_id,
        message_id,
        created_at: models::now(),
        is_read: false,
    };

    conn.prepare_cached(
        "INSERT INTO notifications (id, user_id, message_id, created_at, is_read)
         VALUES (?1, ?2, ?3, ?4, 0)",
    )?
    .execute((
        notification.id.to_string(),
        user_id.to_string(),
        message_id.to_string(),
        models::format_ts(&notification.created_at),
    ))?;

    debug!("Notified user {} of message {}", user_id, message_id);
    Ok(notification)
}

/// Delete the message's notifications, returning the recipient of each
/// deleted row so their cached counts can be dropped after commit.
pub(crate) fn delete_for_message(conn: &Connection, message_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare_cached("DELETE FROM notifications WHERE message_id = ?1 RETURNING user_id")?;
    let recipients = stmt
        .query_map([message_id.to_string()], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    recipients.iter().map(|raw| models::parse_uuid(raw)).collect()
}

/// Delete notifications addressed to `user_id` regardless of which message
/// raised them.
pub(crate) fn delete_for_user(conn: &Connection, user_id: Uuid) -> Result<usize> {
    let removed = conn
        .prepare_cached("DELETE FROM notifications WHERE user_id = ?1")?
        .execute([user_id.to_string()])?;
    Ok(removed)
}

/// Lazy cursor over a user's unread notifications.
///
/// Each page is read with keyset pagination on `(created_at, rowid)`, taking
/// a reader only for the duration of that query. Notifications marked read
/// between pages are skipped; ones created after the cursor has passed their
/// position are not revisited.
pub struct UnreadNotifications<'a> {
    db: &'a Database,
    user_id: Uuid,
    page_size: usize,
    cursor: (String, i64),
    page: VecDeque<Notification>,
    done: bool,
}

impl UnreadNotifications<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let (after_ts, after_rowid) = self.cursor.clone();
        let user_id = self.user_id.to_string();
        let limit = self.page_size as i64;

        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT rowid, {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND is_read = 0
                   AND (created_at > ?2 OR (created_at = ?2 AND rowid > ?3))
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?4"
            ))?;
            let rows = stmt
                .query_map((&user_id, &after_ts, after_rowid, limit), |row| {
                    let rowid: i64 = row.get(0)?;
                    Ok((
                        rowid,
                        NotificationRow {
                            id: row.get(1)?,
                            user_id: row.get(2)?,
                            message_id: row.get(3)?,
                            created_at: row.get(4)?,
                            is_read: row.get(5)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        if rows.len() < self.page_size {
            self.done = true;
        }
        for (rowid, row) in rows {
            self.cursor = (row.created_at.clone(), rowid);
            self.page.push_back(Notification::try_from(row)?);
        }
        Ok(())
    }
}

impl Iterator for UnreadNotifications<'_> {
    type Item = Result<Notification>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}
