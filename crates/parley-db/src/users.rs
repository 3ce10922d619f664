use parley_types::User;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::cascade::{self, PurgeSummary};
use crate::error::{Entity, Result, StoreError};
use crate::models::{self, USER_COLUMNS, UserRow};

/// Answers whether a user id refers to a live account.
///
/// The check receives the connection of the write transaction it runs in, so
/// an implementation backed by the same database sees a consistent view.
/// Directories backed by something else are free to ignore it.
pub trait UserDirectory: Send + Sync {
    fn user_exists(&self, conn: &Connection, user_id: Uuid) -> Result<bool>;
}

/// Directory backed by the `users` table of the same database.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalUsers;

impl UserDirectory for LocalUsers {
    fn user_exists(&self, conn: &Connection, user_id: Uuid) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                [user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl Database {
    // -- Users --

    pub fn register_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || username.chars().count() > 32 {
            return Err(StoreError::validation("username must be 1 to 32 characters"));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: models::now(),
        };

        self.with_tx(|tx| {
            let taken = tx
                .query_row("SELECT 1 FROM users WHERE username = ?1", [&user.username], |_| Ok(()))
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::validation(format!(
                    "username '{}' is taken",
                    user.username
                )));
            }
            tx.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                (user.id.to_string(), &user.username, models::format_ts(&user.created_at)),
            )?;
            Ok(())
        })?;

        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn get_user(&self, user_id: Uuid) -> Result<User> {
        let row = self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    [user_id.to_string()],
                    UserRow::from_row,
                )
                .optional()?;
            Ok(row)
        })?;

        row.ok_or_else(|| StoreError::not_found(Entity::User, user_id))?
            .try_into()
    }

    /// Delete a local account together with every message it sent or
    /// received, in one transaction. Removing an unknown user is a no-op.
    pub fn remove_user(&self, user_id: Uuid) -> Result<PurgeSummary> {
        let (summary, touched) = self.with_tx(|tx| {
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id.to_string()])?;
            cascade::purge_user(tx, user_id)
        })?;

        self.unread_counts().invalidate_all(touched);
        self.unread_counts().invalidate(user_id);
        Ok(summary)
    }
}
