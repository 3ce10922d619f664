use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::error::Result;
use crate::models;
use crate::{history, messages, notifications};

/// What a user purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub messages: usize,
    pub history_entries: usize,
    pub notifications: usize,
    /// Replies by other users to purged messages, now thread roots.
    pub orphaned_replies: usize,
}

impl PurgeSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Removes everything tied to a user once that user is gone.
pub struct CascadeCoordinator<'a> {
    db: &'a Database,
}

impl<'a> CascadeCoordinator<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Delete every message the user sent or received, with their history and
    /// notifications, in one transaction. Running it again for the same user
    /// finds nothing and returns an empty summary.
    ///
    /// The transaction holds the write lock throughout, so no message can be
    /// created for or edited against the user while the purge runs.
    pub fn on_user_removed(&self, user_id: Uuid) -> Result<PurgeSummary> {
        let (summary, touched) = self.db.with_tx(|tx| purge_user(tx, user_id))?;

        let counts = self.db.unread_counts();
        counts.invalidate_all(touched);
        counts.invalidate(user_id);
        Ok(summary)
    }
}

/// Purge inside the caller's transaction. Also returns the recipients of
/// every notification removed, for cache invalidation after commit.
pub(crate) fn purge_user(conn: &Connection, user_id: Uuid) -> Result<(PurgeSummary, Vec<Uuid>)> {
    let uid = user_id.to_string();

    let ids = {
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([&uid], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|raw| models::parse_uuid(raw))
            .collect::<Result<Vec<_>>>()?
    };

    let orphaned_replies: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE parent_id IN (SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1)
           AND sender_id != ?1 AND receiver_id != ?1",
        [&uid],
        |r| r.get(0),
    )?;

    let mut summary = PurgeSummary {
        orphaned_replies: orphaned_replies as usize,
        ..Default::default()
    };
    let mut touched = Vec::new();

    for id in ids {
        let removal = messages::remove(conn, id)?;
        summary.messages += 1;
        summary.history_entries += removal.history_entries;
        summary.notifications += removal.notified.len();
        touched.extend(removal.notified);
    }

    // Notifications raised for the user on messages that are not theirs.
    summary.notifications += notifications::delete_for_user(conn, user_id)?;
    history::forget_editor(conn, user_id)?;

    if !summary.is_empty() {
        info!(
            "Purged user {}: {} messages, {} history entries, {} notifications, {} replies orphaned",
            user_id,
            summary.messages,
            summary.history_entries,
            summary.notifications,
            summary.orphaned_replies
        );
    }
    Ok((summary, touched))
}
