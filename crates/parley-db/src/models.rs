//! Database row types. These map directly to SQLite rows and are kept apart
//! from the parley-types records so the storage format can change on its own.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parley_types::{HistoryEntry, Message, Notification, User};
use rusqlite::Row;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub const USER_COLUMNS: &str = "id, username, created_at";
pub const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, parent_id, body, created_at, edited, is_read";
pub const NOTIFICATION_COLUMNS: &str = "id, user_id, message_id, created_at, is_read";
pub const HISTORY_COLUMNS: &str = "id, message_id, old_body, edited_at, edited_by";

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub parent_id: Option<String>,
    pub body: String,
    pub created_at: String,
    pub edited: bool,
    pub read: bool,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub created_at: String,
    pub is_read: bool,
}

pub struct HistoryRow {
    pub id: String,
    pub message_id: String,
    pub old_body: String,
    pub edited_at: String,
    pub edited_by: Option<String>,
}

impl UserRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            parent_id: row.get(3)?,
            body: row.get(4)?,
            created_at: row.get(5)?,
            edited: row.get(6)?,
            read: row.get(7)?,
        })
    }
}

impl NotificationRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            message_id: row.get(2)?,
            created_at: row.get(3)?,
            is_read: row.get(4)?,
        })
    }
}

impl HistoryRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message_id: row.get(1)?,
            old_body: row.get(2)?,
            edited_at: row.get(3)?,
            edited_by: row.get(4)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            username: row.username,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            sender_id: parse_uuid(&row.sender_id)?,
            receiver_id: parse_uuid(&row.receiver_id)?,
            parent_id: row.parent_id.as_deref().map(parse_uuid).transpose()?,
            body: row.body,
            created_at: parse_ts(&row.created_at)?,
            edited: row.edited,
            read: row.read,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            message_id: parse_uuid(&row.message_id)?,
            created_at: parse_ts(&row.created_at)?,
            is_read: row.is_read,
        })
    }
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            message_id: parse_uuid(&row.message_id)?,
            old_body: row.old_body,
            edited_at: parse_ts(&row.edited_at)?,
            edited_by: row.edited_by.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

/// Current time at the precision timestamps are stored with, so a record
/// returned from a write compares equal to the same record read back.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339, which sorts lexicographically in time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("uuid '{raw}': {e}")))
}
