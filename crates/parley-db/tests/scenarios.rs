use std::collections::HashSet;
use std::path::Path;
use std::thread;
use std::time::Duration;

use parley_db::{Database, Entity, StoreConfig, StoreError};
use parley_types::NewMessage;

fn memory_db() -> Database {
    Database::open_in_memory(StoreConfig::default()).unwrap()
}

#[test]
fn create_edit_then_remove_receiver() {
    let db = memory_db();
    let u1 = db.register_user("u1").unwrap().id;
    let u2 = db.register_user("u2").unwrap().id;

    let m1 = db.messages().create(NewMessage::new(u1, u2, "hi")).unwrap();
    let n1 = db.notifications().unread_for(u2).next().unwrap().unwrap();
    assert_eq!(n1.message_id, m1.id);
    assert_eq!(n1.user_id, u2);

    let m1 = db.messages().edit(m1.id, "hello", Some(u1)).unwrap();
    assert!(m1.edited);
    let history = db.history().history_for(m1.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_body, "hi");

    let summary = db.remove_user(u2).unwrap();
    assert_eq!(summary.messages, 1);
    assert_eq!(summary.history_entries, 1);
    assert_eq!(summary.notifications, 1);

    assert!(matches!(
        db.messages().get(m1.id),
        Err(StoreError::NotFound { entity: Entity::Message, .. })
    ));
    assert!(db.history().history_for(m1.id).unwrap().is_empty());
    assert!(db.notifications().for_message(m1.id).unwrap().is_empty());
    assert_eq!(db.notifications().unread_for(u2).count(), 0);

    // Retrying the purge is safe.
    assert!(db.cascade().on_user_removed(u2).unwrap().is_empty());
}

#[test]
fn ten_thousand_deep_thread_is_reconstructed() {
    const DEPTH: usize = 10_000;

    let db = memory_db();
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;

    let root = db.messages().create(NewMessage::new(alice, bob, "0")).unwrap();
    let mut parent = root.id;
    for i in 1..=DEPTH {
        let (from, to) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
        parent = db
            .messages()
            .create(NewMessage::new(from, to, i.to_string()).reply_to(parent))
            .unwrap()
            .id;
    }

    let thread = db.threads().thread_of(root.id).unwrap();
    assert_eq!(thread.depth(), DEPTH);
    assert_eq!(thread.len(), DEPTH + 1);

    let bodies: Vec<usize> = thread.iter().map(|m| m.body.parse().unwrap()).collect();
    assert!(bodies.iter().copied().eq(0..=DEPTH));
}

#[test]
fn ten_thousand_deep_thread_serializes() {
    const DEPTH: usize = 10_000;

    let db = memory_db();
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;

    let root = db.messages().create(NewMessage::new(alice, bob, "0")).unwrap();
    let mut parent = root.id;
    for i in 1..=DEPTH {
        parent = db
            .messages()
            .create(NewMessage::new(alice, bob, i.to_string()).reply_to(parent))
            .unwrap()
            .id;
    }

    let thread = db.messages().get_thread(root.id).unwrap();
    let json = serde_json::to_string_pretty(&thread).unwrap();

    let entries: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(entries.len(), DEPTH + 1);
    assert_eq!(entries[DEPTH]["depth"], DEPTH);
    assert_eq!(entries[DEPTH]["message"]["parent_id"], entries[DEPTH - 1]["message"]["id"]);
    assert!(format!("{thread:?}").contains(&format!("depth: {DEPTH}")));
}

#[test]
fn concurrent_edits_lose_no_history() {
    const WRITERS: usize = 8;
    const EDITS_EACH: usize = 5;

    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("parley.db"), StoreConfig::default()).unwrap();
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;
    let m = db.messages().create(NewMessage::new(alice, bob, "original")).unwrap();

    thread::scope(|s| {
        for w in 0..WRITERS {
            let db = &db;
            s.spawn(move || {
                for e in 0..EDITS_EACH {
                    db.messages().edit(m.id, &format!("w{w}-e{e}"), Some(alice)).unwrap();
                }
            });
        }
    });

    let history = db.history().history_for(m.id).unwrap();
    assert_eq!(history.len(), WRITERS * EDITS_EACH);
    assert_eq!(history[0].old_body, "original");

    // Every body written appears exactly once: either as a later snapshot or as
    // the final body.
    let final_body = db.messages().get(m.id).unwrap().body;
    let mut seen: Vec<String> = history[1..].iter().map(|h| h.old_body.clone()).collect();
    seen.push(final_body);
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());

    let written: HashSet<String> = (0..WRITERS)
        .flat_map(|w| (0..EDITS_EACH).map(move |e| format!("w{w}-e{e}")))
        .collect();
    assert_eq!(seen.into_iter().collect::<HashSet<_>>(), written);
}

/// File database whose writes fail at once when another connection holds the
/// write lock, so every attempt blocked by it surfaces as a conflict.
fn impatient_db(dir: &Path, edit_retries: u32) -> Database {
    let config = StoreConfig {
        edit_retries,
        busy_timeout_ms: 0,
        ..Default::default()
    };
    Database::open(&dir.join("parley.db"), config).unwrap()
}

fn hold_write_lock(dir: &Path) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(dir.join("parley.db")).unwrap();
    conn.execute_batch("BEGIN IMMEDIATE").unwrap();
    conn
}

#[test]
fn edit_gives_up_after_retries_without_logging_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = impatient_db(dir.path(), 2);
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;
    let m = db.messages().create(NewMessage::new(alice, bob, "original")).unwrap();

    let other = hold_write_lock(dir.path());
    let err = db.messages().edit(m.id, "changed", Some(alice)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict { message_id: Some(id), attempts: 3 } if id == m.id
    ));
    assert!(err.is_retryable());

    assert!(db.history().history_for(m.id).unwrap().is_empty());
    assert_eq!(db.messages().get(m.id).unwrap().body, "original");

    other.execute_batch("ROLLBACK").unwrap();
    assert_eq!(db.messages().edit(m.id, "changed", None).unwrap().body, "changed");
    assert_eq!(db.history().entry_count(m.id).unwrap(), 1);
}

#[test]
fn edit_succeeds_once_the_competing_writer_lets_go() {
    let dir = tempfile::tempdir().unwrap();
    let db = impatient_db(dir.path(), 50);
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;
    let m = db.messages().create(NewMessage::new(alice, bob, "original")).unwrap();

    let other = hold_write_lock(dir.path());
    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        other.execute_batch("ROLLBACK").unwrap();
    });

    let edited = db.messages().edit(m.id, "changed", Some(alice)).unwrap();
    release.join().unwrap();

    assert_eq!(edited.body, "changed");
    let history = db.history().history_for(m.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_body, "original");
}

#[test]
fn creates_racing_a_purge_leave_nothing_behind() {
    let db = memory_db();
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;

    thread::scope(|s| {
        let db = &db;
        for _ in 0..4 {
            s.spawn(move || {
                for i in 0..50 {
                    match db.messages().create(NewMessage::new(alice, bob, format!("m{i}"))) {
                        Ok(_) => {}
                        Err(StoreError::NotFound { entity: Entity::User, id }) => {
                            assert_eq!(id, bob);
                            break;
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
        s.spawn(move || {
            thread::yield_now();
            db.remove_user(bob).unwrap();
        });
    });

    assert!(db.messages().conversation(alice, bob).unwrap().is_empty());
    assert_eq!(db.notifications().unread_for(bob).count(), 0);
    assert_eq!(db.notifications().unread_count(bob).unwrap(), 0);
}

#[test]
fn deleting_a_message_only_touches_that_message() {
    let db = memory_db();
    let alice = db.register_user("alice").unwrap().id;
    let bob = db.register_user("bob").unwrap().id;

    let keep = db.messages().create(NewMessage::new(alice, bob, "keep")).unwrap();
    let doomed = db.messages().create(NewMessage::new(alice, bob, "drop")).unwrap();
    db.messages().edit(keep.id, "kept", None).unwrap();
    db.messages().edit(doomed.id, "dropped", None).unwrap();

    db.messages().delete(doomed.id).unwrap();

    assert_eq!(db.history().history_for(keep.id).unwrap().len(), 1);
    assert_eq!(db.notifications().for_message(keep.id).unwrap().len(), 1);
    assert_eq!(db.notifications().unread_count(bob).unwrap(), 1);
    assert!(matches!(
        db.messages().delete(doomed.id),
        Err(StoreError::NotFound { .. })
    ));
}
