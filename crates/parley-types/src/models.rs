use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A direct message between two users, optionally replying to an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub read: bool,
}

impl Message {
    /// A message with no parent starts its own thread.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Prior body of a message, captured before an edit replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub message_id: Uuid,
    pub old_body: String,
    pub edited_at: DateTime<Utc>,
    pub edited_by: Option<Uuid>,
}

/// A message together with its replies, each reply carrying its own replies.
///
/// Replies are ordered oldest first. Walking, serializing and dropping a
/// thread are all iterative, so arbitrarily deep reply chains are safe to
/// hold, print and release.
///
/// Serialized form is flat: the messages in pre-order, each tagged with its
/// depth below the root. `parent_id` on each message carries the nesting.
pub struct Thread {
    pub message: Message,
    pub replies: Vec<Thread>,
}

// A thread always holds at least its root, so there is no `is_empty`.
#[allow(clippy::len_without_is_empty)]
impl Thread {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            replies: Vec::new(),
        }
    }

    /// Total number of messages in the thread, root included.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Length of the longest reply chain below the root. A lone root has depth 0.
    pub fn depth(&self) -> usize {
        self.walk().map(|(level, _)| level).max().unwrap_or(0)
    }

    /// Pre-order walk: a message is yielded before its replies, replies oldest first.
    pub fn iter(&self) -> ThreadIter<'_> {
        ThreadIter { walk: self.walk() }
    }

    /// Same order as [`Thread::iter`], with each message's depth below the root.
    pub fn walk(&self) -> ThreadWalk<'_> {
        ThreadWalk {
            stack: vec![(self, 0)],
        }
    }
}

impl Serialize for Thread {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.walk().map(|(depth, message)| ThreadEntry { depth, message }))
    }
}

#[derive(Serialize)]
struct ThreadEntry<'a> {
    depth: usize,
    message: &'a Message,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("root", &self.message.id)
            .field("len", &self.len())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

pub struct ThreadWalk<'a> {
    stack: Vec<(&'a Thread, usize)>,
}

impl<'a> Iterator for ThreadWalk<'a> {
    type Item = (usize, &'a Message);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, level) = self.stack.pop()?;
        self.stack.extend(node.replies.iter().rev().map(|reply| (reply, level + 1)));
        Some((level, &node.message))
    }
}

pub struct ThreadIter<'a> {
    walk: ThreadWalk<'a>,
}

impl<'a> Iterator for ThreadIter<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        self.walk.next().map(|(_, message)| message)
    }
}
