use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Messages --

/// Input for `MessageStore::create`. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

impl NewMessage {
    pub fn new(sender_id: Uuid, receiver_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            body: body.into(),
            parent_id: None,
        }
    }

    /// Mark this message as a reply to `parent_id`.
    pub fn reply_to(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}
