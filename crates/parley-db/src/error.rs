use std::fmt;

use rusqlite::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

/// Record kinds that a lookup can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Message,
    User,
    Notification,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => f.write_str("message"),
            Self::User => f.write_str("user"),
            Self::Notification => f.write_str("notification"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    /// A concurrent writer got there first. `message_id` is set when an edit
    /// gave up after `attempts` tries.
    #[error("write conflict after {attempts} attempt(s){}", conflict_target(.message_id))]
    Conflict {
        message_id: Option<Uuid>,
        attempts: u32,
    },

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Conflicts are the only errors worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Conflict {
                message_id: None,
                attempts: 1,
            },
            _ => Self::Storage(err),
        }
    }
}

fn conflict_target(message_id: &Option<Uuid>) -> String {
    message_id.map(|id| format!(" on message {id}")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, StoreError>;
