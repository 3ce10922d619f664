use std::collections::HashMap;

use parley_types::{Message, Thread};
use rusqlite::Connection;
use uuid::Uuid;

use crate::Database;
use crate::error::{Entity, Result, StoreError};
use crate::messages;
use crate::models::MESSAGE_COLUMNS;

/// Read-only view of reply threads, derived from each message's `parent_id`.
pub struct ThreadIndex<'a> {
    db: &'a Database,
}

impl<'a> ThreadIndex<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Direct replies to a message, oldest first.
    pub fn children_of(&self, message_id: Uuid) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            if !messages::exists(conn, message_id)? {
                return Err(StoreError::not_found(Entity::Message, message_id));
            }
            messages::query(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE parent_id = ?1
                     ORDER BY created_at ASC, rowid ASC"
                ),
                [message_id.to_string()],
            )
        })
    }

    /// The message plus every reply below it, at any depth.
    pub fn thread_of(&self, root_id: Uuid) -> Result<Thread> {
        self.db.with_conn(|conn| thread_of(conn, root_id))
    }
}

/// Loads the whole subtree in one recursive query, then assembles it without
/// recursion so chain length is bounded only by memory.
pub(crate) fn thread_of(conn: &Connection, root_id: Uuid) -> Result<Thread> {
    let members = messages::query(
        conn,
        &format!(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM messages WHERE id = ?1
                 UNION ALL
                 SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
             )
             SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE id IN (SELECT id FROM subtree)
             ORDER BY created_at ASC, rowid ASC"
        ),
        [root_id.to_string()],
    )?;

    assemble(root_id, members)
}

/// Build the nested thread rooted at `root_id` from a flat, chronologically
/// ordered list of its members.
pub(crate) fn assemble(root_id: Uuid, members: Vec<Message>) -> Result<Thread> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut arena: HashMap<Uuid, Message> = HashMap::with_capacity(members.len());
    for message in members {
        if message.id != root_id {
            if let Some(parent_id) = message.parent_id {
                children.entry(parent_id).or_default().push(message.id);
            }
        }
        arena.insert(message.id, message);
    }
    if !arena.contains_key(&root_id) {
        return Err(StoreError::not_found(Entity::Message, root_id));
    }

    // Pre-order puts every message before its descendants, so walking it
    // backwards finishes all replies before the message they answer.
    let mut order = Vec::with_capacity(arena.len());
    let mut stack = vec![root_id];
    while let Some(id) = stack.pop() {
        order.push(id);
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().rev());
        }
    }

    let mut built: HashMap<Uuid, Thread> = HashMap::with_capacity(order.len());
    for id in order.into_iter().rev() {
        let message = arena
            .remove(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("message {id} reached twice in thread")))?;
        let mut node = Thread::new(message);
        if let Some(kids) = children.get(&id) {
            node.replies.extend(kids.iter().filter_map(|kid| built.remove(kid)));
        }
        built.insert(id, node);
    }

    built
        .remove(&root_id)
        .ok_or_else(|| StoreError::not_found(Entity::Message, root_id))
}

#[cfg(test)]
mod tests {
    use parley_types::NewMessage;

    use super::*;
    use crate::test_support::*;

    #[test]
    fn chain_nests_one_reply_per_level() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let root = db.messages().create(NewMessage::new(alice, bob, "root")).unwrap();
        let a = db.messages().create(NewMessage::new(bob, alice, "a").reply_to(root.id)).unwrap();
        let b = db.messages().create(NewMessage::new(alice, bob, "b").reply_to(a.id)).unwrap();
        let c = db.messages().create(NewMessage::new(bob, alice, "c").reply_to(b.id)).unwrap();

        let thread = db.threads().thread_of(root.id).unwrap();
        assert_eq!(thread.message.id, root.id);
        assert_eq!(thread.replies.len(), 1);
        assert_eq!(thread.replies[0].message.id, a.id);
        assert_eq!(thread.replies[0].replies[0].message.id, b.id);
        assert_eq!(thread.replies[0].replies[0].replies[0].message.id, c.id);
        assert!(thread.replies[0].replies[0].replies[0].replies.is_empty());
        assert_eq!(thread.depth(), 3);
    }

    #[test]
    fn siblings_are_chronological() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let root = db.messages().create(NewMessage::new(alice, bob, "root")).unwrap();
        for body in ["first", "second", "third"] {
            db.messages().create(NewMessage::new(bob, alice, body).reply_to(root.id)).unwrap();
        }

        let replies: Vec<String> = db
            .threads()
            .children_of(root.id)
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(replies, ["first", "second", "third"]);

        let thread = db.messages().get_thread(root.id).unwrap();
        let bodies: Vec<&str> = thread.replies.iter().map(|t| t.message.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[test]
    fn subthread_excludes_ancestors_and_other_branches() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let root = db.messages().create(NewMessage::new(alice, bob, "root")).unwrap();
        let left = db
            .messages()
            .create(NewMessage::new(bob, alice, "left").reply_to(root.id))
            .unwrap();
        db.messages().create(NewMessage::new(bob, alice, "right").reply_to(root.id)).unwrap();
        db.messages().create(NewMessage::new(alice, bob, "left.1").reply_to(left.id)).unwrap();

        let thread = db.threads().thread_of(left.id).unwrap();
        let bodies: Vec<&str> = thread.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["left", "left.1"]);
    }

    #[test]
    fn unknown_root_is_not_found() {
        let db = db();
        assert!(matches!(
            db.threads().thread_of(Uuid::new_v4()),
            Err(StoreError::NotFound { entity: Entity::Message, .. })
        ));
        assert!(matches!(
            db.messages().get_thread(Uuid::new_v4()),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            db.threads().children_of(Uuid::new_v4()),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn assemble_handles_deep_chains_without_recursion() {
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let now = chrono::Utc::now();

        let mut members = Vec::new();
        let mut parent_id = None;
        for i in 0..50_000 {
            let id = Uuid::new_v4();
            members.push(Message {
                id,
                sender_id: sender,
                receiver_id: receiver,
                parent_id,
                body: format!("m{i}"),
                created_at: now,
                edited: false,
                read: false,
            });
            parent_id = Some(id);
        }
        let root_id = members[0].id;

        let thread = assemble(root_id, members).unwrap();
        assert_eq!(thread.depth(), 49_999);
        assert_eq!(thread.len(), 50_000);
    }
}
